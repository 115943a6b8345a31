//! Writes the debugger startup script to `~/.xkdb`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use xkdb_proto::orchestrate::DebuggerScript;

pub struct HomeDirScript {
    pub home: PathBuf,
}

impl DebuggerScript for HomeDirScript {
    fn write(&self, debugger_port: u16, executable: &Path) -> io::Result<()> {
        let contents = format!(
            "file {}\ntarget remote localhost:{debugger_port}\n",
            executable.display()
        );
        fs::write(self.home.join(".xkdb"), contents)
    }
}
