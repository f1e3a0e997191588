use crate::store::StoreError;
use log::debug;
use rusqlite::Connection;

// Embed migrations from the migrations directory
refinery::embed_migrations!("migrations");

/// Opens the SQLite file backing the document store and brings its catalog schema up to date
pub fn init_connection(db_path: &str) -> Result<Connection, StoreError> {
    let mut conn = Connection::open(db_path).map_err(StoreError::unavailable)?;

    match migrations::runner().run(&mut conn) {
        Ok(report) => {
            debug!(
                "Store migrations completed ({} applied)",
                report.applied_migrations().len()
            );
        }
        Err(e) => {
            return Err(StoreError::Migration(e.to_string()));
        }
    }

    Ok(conn)
}
