pub mod completion_client;
pub mod ledger_store;
pub mod venue_client;

pub use completion_client::{CompletionClient, CompletionRequest};
pub use ledger_store::{LedgerError, LedgerResult, LedgerStore, TradeCorrection};
pub use venue_client::{VenueClient, VenueError, VenueResult};
