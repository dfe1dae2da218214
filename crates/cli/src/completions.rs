use clap::CommandFactory;
use clap_complete::Shell;
use std::io;

use crate::args::Cli;

pub fn generate(shell: Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "docsift", &mut io::stdout());
}
