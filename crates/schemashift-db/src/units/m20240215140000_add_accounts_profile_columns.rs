use crate::migration::MigrationUnit;
use crate::schema::{ColumnDef, ColumnType};

pub fn unit() -> MigrationUnit {
    MigrationUnit::new(
        "20240215140000-add-accounts-profile-columns",
        |schema| {
            schema.add_column(
                "accounts",
                ColumnDef::new("display_name", ColumnType::Text)
                    .comment("Name shown next to the account in the UI"),
            )?;
            schema.add_column(
                "accounts",
                ColumnDef::new("external_ref", ColumnType::Integer)
                    .comment("Identifier of the account in the billing system"),
            )
        },
        |schema| {
            schema.remove_column("accounts", "external_ref")?;
            schema.remove_column("accounts", "display_name")
        },
    )
}
