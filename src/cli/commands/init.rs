use clap::Args;

use crate::Result;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to initialize; must be empty or not exist yet.
    pub directory: String,
}

pub(crate) fn handle(args: &InitArgs) -> Result<()> {
    crate::init::run(&args.directory)
}
