//! Schema statements, applied in order by [`SqliteStore::migrate`](crate::SqliteStore::migrate).

pub(crate) const STATEMENTS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS guests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        full_name TEXT NOT NULL,
        email TEXT,
        phone TEXT,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    ",
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_guests_email
        ON guests (email) WHERE email IS NOT NULL
    ",
    r"
    CREATE TABLE IF NOT EXISTS stays (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        reservation_id TEXT,
        guest_id INTEGER NOT NULL REFERENCES guests (id),
        room_number TEXT,
        planned_check_in TEXT NOT NULL,
        planned_check_out TEXT,
        status TEXT NOT NULL,
        total_amount REAL NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    ",
    // At most one non-cancelled stay per reservation.
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_stays_active_reservation
        ON stays (reservation_id)
        WHERE reservation_id IS NOT NULL AND status <> 'cancelled'
    ",
    r"
    CREATE TABLE IF NOT EXISTS rooms (
        room_number TEXT PRIMARY KEY,
        status TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS cleaning_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        room_number TEXT NOT NULL,
        task_type TEXT NOT NULL,
        scheduled_for TEXT NOT NULL,
        priority TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending'
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS notifications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        message TEXT NOT NULL,
        notification_type TEXT NOT NULL,
        sender_system TEXT NOT NULL,
        recipient_system TEXT NOT NULL,
        external_id TEXT,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        read_at TEXT
    )
    ",
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_external
        ON notifications (sender_system, external_id) WHERE external_id IS NOT NULL
    ",
    r"
    CREATE TABLE IF NOT EXISTS sync_cursors (
        sync_type TEXT PRIMARY KEY,
        last_run_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS failed_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        channel TEXT NOT NULL,
        payload BLOB NOT NULL,
        error_message TEXT NOT NULL,
        failed_at TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        resolved_at TEXT
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_failed_messages_status
        ON failed_messages (status, failed_at)
    ",
];
