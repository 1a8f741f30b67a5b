use crate::Result;
use crate::meta::MetaRepo;

pub(crate) fn handle() -> Result<()> {
    let meta = MetaRepo::discover()?;
    crate::log::run(&meta)
}
