pub(crate) mod build;
pub(crate) mod noise;
mod run;

pub(crate) use run::run;
