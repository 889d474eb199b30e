pub mod config;
pub mod error;
pub mod executor;
pub mod facts;
pub mod guard;
pub mod inventory;
pub mod modules;
pub mod playbook;
pub mod report;
pub mod transport;
pub mod types;
pub mod utils;

#[cfg(test)]
mod tests;

pub use config::{RetryPolicy, RunOptions};
pub use error::ConvergeError;
pub use executor::PlayRunner;
pub use guard::Guard;
pub use inventory::{GroupDef, HostEntry, Inventory, ResolvedInventory};
pub use modules::{ModuleSpec, PackageState};
pub use playbook::{Play, Playbook, Task};
pub use report::{HostRecap, HostReport, PlayReport, RunReport};
pub use transport::{Connector, LocalConnector, SshConnector, Transport};
pub use types::{CommandResult, Diff, Facts, Host, TaskOutcome, TaskStatus};

// 便捷的重新导出
pub type Result<T> = std::result::Result<T, ConvergeError>;
