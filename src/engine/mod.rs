// 8.0: the venue engine. owns the ledger, the event stream and every market,
// and lends the shared parts to one market per command.
// deterministic and single threaded with no external I/O.

mod config;
mod core;
mod lifecycle;
mod orders;
mod results;

pub use config::EngineConfig;
pub use core::Engine;
pub use results::EngineError;
