//! Metering table schema, bit-compatible with the collaborator processes
//! that share the same SQLite file.

pub const CREATE_METERING_TABLE: &str = "
CREATE TABLE IF NOT EXISTS Metering (
       id INTEGER PRIMARY KEY,
       meter_id INTEGER NOT NULL,
       datetime TEXT,
       value REAL,
       state INTEGER
);
";
