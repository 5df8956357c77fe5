use crate::migration::MigrationUnit;
use crate::schema::{ColumnDef, ColumnType};

pub fn unit() -> MigrationUnit {
    MigrationUnit::new(
        "20240110093000-create-accounts",
        |schema| {
            schema.create_table(
                "accounts",
                &[
                    ColumnDef::new("id", ColumnType::Integer).primary_key(),
                    ColumnDef::new("email", ColumnType::Text).not_null(),
                    ColumnDef::new("created_at", ColumnType::DateTime)
                        .not_null()
                        .default_sql("CURRENT_TIMESTAMP"),
                ],
            )?;
            schema.execute("CREATE UNIQUE INDEX idx_accounts_email ON accounts(email)")
        },
        |schema| schema.drop_table("accounts"),
    )
}
