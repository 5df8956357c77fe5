use crate::migration::MigrationUnit;

pub fn unit() -> MigrationUnit {
    MigrationUnit::irreversible(
        "20240418160000-describe-accounts-email",
        |schema| {
            schema.set_comment(
                "accounts",
                "email",
                Some("Login address; unique, compared case-sensitively"),
            )
        },
        "column comments are descriptive and have no rollback",
    )
}
