//! The application's own schema history.

use schemashift_common::Result;

use crate::migration::{MigrationSet, MigrationUnit};

macro_rules! include_units {
    ($($module:ident),* $(,)?) => {
        $(mod $module;)*

        /// Every built-in unit, in declaration order.
        pub fn all() -> Vec<MigrationUnit> {
            vec![
                $($module::unit(),)*
            ]
        }
    };
}

include_units! {
    m20240110093000_create_accounts,
    m20240215140000_add_accounts_profile_columns,
    m20240302111500_change_accounts_external_ref_type,
    m20240418160000_describe_accounts_email,
}

pub fn catalog() -> Result<MigrationSet> {
    MigrationSet::new(all())
}
