//! Multi-network contract event scanner: one resumable scanner per chain,
//! a shared checkpoint ledger and Slack alerts for every matched event.

pub mod bootstrap;
pub mod decoder;
pub mod notifier;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod rpc;
pub mod scanner;

pub use bootstrap::{run, MonitorError};
pub use decoder::{EventDecoder, RootSubmittedDecoder};
pub use notifier::{LogNotifier, Notifier, SlackNotifier};
pub use orchestrator::{OrchestratorError, ScannerOrchestrator};
pub use rpc::{ChainClient, JsonRpcChainClient, LogBatch, RpcError};
pub use scanner::{NetworkScanner, ScannerDeps, ScannerError, ScannerState};
