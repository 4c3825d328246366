pub mod types;
pub mod address;
pub mod bitmap;
pub mod level;
pub mod records;
pub mod instruction;
pub mod transaction;
pub mod signing;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod prometheus_metrics;
pub mod error_handling;
pub mod error;
pub mod store;
pub mod ledger;
pub mod rpc;
pub mod local;
pub mod orchestrator;

pub use address::AddressDeriver;
pub use bitmap::LessonBitmap;
pub use config::Config;
pub use error::{ErrorKind, ProgressError};
pub use ledger::{LedgerBackend, backend_from_config};
pub use level::LevelSummary;
pub use orchestrator::{CompletionOutcome, CourseProgress, EnrollOutcome, ProgressOrchestrator, RewardAccountOutcome};
pub use signing::{KeypairSigner, TransactionSigner};
pub use types::Pubkey;
