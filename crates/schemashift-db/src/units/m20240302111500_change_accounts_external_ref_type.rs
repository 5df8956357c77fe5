use crate::migration::MigrationUnit;
use crate::schema::ColumnType;

// Billing moved to opaque string identifiers.
pub fn unit() -> MigrationUnit {
    MigrationUnit::new(
        "20240302111500-change-accounts-external-ref-type",
        |schema| schema.change_column_type("accounts", "external_ref", ColumnType::Text),
        |schema| schema.change_column_type("accounts", "external_ref", ColumnType::Integer),
    )
}
