mod app;
mod env;
mod runtime;

pub use app::run;
pub use env::CliArgs;
pub use runtime::init_logging;
