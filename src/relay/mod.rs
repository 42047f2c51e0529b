mod handlers;
mod phase;
mod server;
mod stats;
#[cfg(test)]
mod tests;

pub use handlers::AnalyzeRequest;
pub use phase::{PhaseTracker, RequestPhase};
pub use server::{build_router, RelayServer, RelayServerBuilder, RelayState};
pub use stats::{RelayStats, RelayStatsSnapshot};
