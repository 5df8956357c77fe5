pub mod ledger;
pub mod migration;
pub mod runner;
pub mod schema;
pub mod store;
pub mod units;

pub use ledger::{AppliedMigration, Ledger};
pub use migration::{MigrationFn, MigrationSet, MigrationUnit, Revert};
pub use runner::{
    ApplyOutcome, ApplyReport, MigrationState, MigrationStatus, Migrator, RevertReport,
    RevertedUnit,
};
pub use schema::{ColumnDef, ColumnInfo, ColumnType, SchemaHandle};
pub use store::Store;
