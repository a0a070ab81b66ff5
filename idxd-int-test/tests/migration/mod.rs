mod destructive_migration_test;
mod schema_migration_test;
