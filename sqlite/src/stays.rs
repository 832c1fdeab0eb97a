//! Guests, stays, rooms and cleaning tasks.

use crate::{BEGIN_IMMEDIATE, SqliteStore, db_err, is_unique_violation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use frontdesk_sync_core::model::{
    CleaningTask, Guest, GuestProfile, LocalStay, RoomStatus, StayDraft, StayStatus, TaskPriority,
    TaskType, UpsertAction, UpsertOutcome,
};
use frontdesk_sync_core::service::{HousekeepingService, ServiceResult};
use frontdesk_sync_core::store::{StayStore, StoreError};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

fn row_to_stay(row: &SqliteRow) -> Result<LocalStay, StoreError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(LocalStay {
        id: row.try_get("id").map_err(db_err)?,
        reservation_id: row.try_get("reservation_id").map_err(db_err)?,
        guest_id: row.try_get("guest_id").map_err(db_err)?,
        room_number: row.try_get("room_number").map_err(db_err)?,
        planned_check_in: row.try_get("planned_check_in").map_err(db_err)?,
        planned_check_out: row.try_get("planned_check_out").map_err(db_err)?,
        status: StayStatus::parse(&status)?,
        total_amount: row.try_get("total_amount").map_err(db_err)?,
    })
}

fn row_to_guest(row: &SqliteRow) -> Result<Guest, StoreError> {
    Ok(Guest {
        id: row.try_get("id").map_err(db_err)?,
        full_name: row.try_get("full_name").map_err(db_err)?,
        email: row.try_get("email").map_err(db_err)?,
        phone: row.try_get("phone").map_err(db_err)?,
    })
}

impl SqliteStore {
    async fn find_guest_by_email(&self, email: &str) -> Result<Option<Guest>, StoreError> {
        sqlx::query("SELECT id, full_name, email, phone FROM guests WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(|row| row_to_guest(&row))
            .transpose()
    }

    async fn find_stay(&self, stay_id: i64) -> Result<LocalStay, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, reservation_id, guest_id, room_number, planned_check_in,
                   planned_check_out, status, total_amount
            FROM stays
            WHERE id = ?
            ",
        )
        .bind(stay_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::NotFound(format!("stay {stay_id}")))?;

        row_to_stay(&row)
    }

    /// One lookup-then-write pass in its own immediate transaction.
    ///
    /// Returns `None` when the insert hit the unique index anyway (a writer outside
    /// this store); the transaction is rolled back and the caller re-reads.
    async fn try_upsert_stay(&self, draft: &StayDraft) -> Result<Option<UpsertOutcome>, StoreError> {
        let mut tx = self.pool.begin_with(BEGIN_IMMEDIATE).await.map_err(db_err)?;

        let existing = sqlx::query(
            r"
            SELECT id, reservation_id, guest_id, room_number, planned_check_in,
                   planned_check_out, status, total_amount
            FROM stays
            WHERE reservation_id = ? AND status <> 'cancelled'
            ",
        )
        .bind(&draft.reservation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .map(|row| row_to_stay(&row))
        .transpose()?;

        let outcome = match existing {
            Some(stay) if draft.matches(&stay) => UpsertOutcome {
                action: UpsertAction::Skipped,
                stay,
            },
            Some(stay) => {
                sqlx::query(
                    r"
                    UPDATE stays
                    SET guest_id = ?, room_number = ?, planned_check_in = ?,
                        planned_check_out = ?, total_amount = ?
                    WHERE id = ?
                    ",
                )
                .bind(draft.guest_id)
                .bind(&draft.room_number)
                .bind(draft.planned_check_in)
                .bind(draft.planned_check_out)
                .bind(draft.total_amount)
                .bind(stay.id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                UpsertOutcome {
                    action: UpsertAction::Updated,
                    stay: LocalStay {
                        guest_id: draft.guest_id,
                        room_number: draft.room_number.clone(),
                        planned_check_in: draft.planned_check_in,
                        planned_check_out: draft.planned_check_out,
                        total_amount: draft.total_amount,
                        ..stay
                    },
                }
            }
            None => {
                let inserted = sqlx::query(
                    r"
                    INSERT INTO stays (
                        reservation_id, guest_id, room_number, planned_check_in,
                        planned_check_out, status, total_amount
                    ) VALUES (?, ?, ?, ?, ?, ?, ?)
                    ",
                )
                .bind(&draft.reservation_id)
                .bind(draft.guest_id)
                .bind(&draft.room_number)
                .bind(draft.planned_check_in)
                .bind(draft.planned_check_out)
                .bind(StayStatus::Confirmed.as_str())
                .bind(draft.total_amount)
                .execute(&mut *tx)
                .await;

                let result = match inserted {
                    Ok(result) => result,
                    Err(e) if is_unique_violation(&e) => return Ok(None),
                    Err(e) => return Err(db_err(e)),
                };

                UpsertOutcome {
                    action: UpsertAction::Created,
                    stay: LocalStay {
                        id: result.last_insert_rowid(),
                        reservation_id: Some(draft.reservation_id.clone()),
                        guest_id: draft.guest_id,
                        room_number: draft.room_number.clone(),
                        planned_check_in: draft.planned_check_in,
                        planned_check_out: draft.planned_check_out,
                        status: StayStatus::Confirmed,
                        total_amount: draft.total_amount,
                    },
                }
            }
        };

        tx.commit().await.map_err(db_err)?;
        Ok(Some(outcome))
    }
}

#[async_trait]
impl StayStore for SqliteStore {
    async fn upsert_guest(&self, profile: &GuestProfile) -> Result<Guest, StoreError> {
        if let Some(email) = &profile.email {
            if let Some(guest) = self.find_guest_by_email(email).await? {
                return Ok(guest);
            }
        }

        let inserted = sqlx::query("INSERT INTO guests (full_name, email, phone) VALUES (?, ?, ?)")
            .bind(&profile.full_name)
            .bind(&profile.email)
            .bind(&profile.phone)
            .execute(&self.pool)
            .await;

        match inserted {
            Ok(result) => Ok(Guest {
                id: result.last_insert_rowid(),
                full_name: profile.full_name.clone(),
                email: profile.email.clone(),
                phone: profile.phone.clone(),
            }),
            // Another writer registered the same email first.
            Err(e) if is_unique_violation(&e) => {
                let email = profile.email.as_deref().unwrap_or_default();
                self.find_guest_by_email(email)
                    .await?
                    .ok_or_else(|| StoreError::Conflict(format!("guest email {email}")))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn update_guest(&self, guest_id: i64, profile: &GuestProfile) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r"
            UPDATE guests
            SET full_name = ?, email = COALESCE(?, email), phone = COALESCE(?, phone)
            WHERE id = ?
            ",
        )
        .bind(&profile.full_name)
        .bind(&profile.email)
        .bind(&profile.phone)
        .bind(guest_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("guest email already registered: {e}"))
            } else {
                db_err(e)
            }
        })?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("guest {guest_id}")));
        }
        Ok(())
    }

    async fn upsert_stay_for_reservation(
        &self,
        draft: &StayDraft,
    ) -> Result<UpsertOutcome, StoreError> {
        let outcome = match self.try_upsert_stay(draft).await? {
            Some(outcome) => outcome,
            None => {
                tracing::debug!(
                    reservation_id = %draft.reservation_id,
                    "Concurrent insert detected, re-reading stay"
                );
                self.try_upsert_stay(draft).await?.ok_or_else(|| {
                    StoreError::Conflict(format!("reservation {}", draft.reservation_id))
                })?
            }
        };

        tracing::debug!(
            reservation_id = %draft.reservation_id,
            stay_id = outcome.stay.id,
            action = outcome.action.as_str(),
            "Stay upserted"
        );
        metrics::counter!("frontdesk_sync.stays.upserted", "action" => outcome.action.as_str())
            .increment(1);

        Ok(outcome)
    }

    async fn find_active_stay(
        &self,
        reservation_id: &str,
    ) -> Result<Option<LocalStay>, StoreError> {
        sqlx::query(
            r"
            SELECT id, reservation_id, guest_id, room_number, planned_check_in,
                   planned_check_out, status, total_amount
            FROM stays
            WHERE reservation_id = ? AND status <> 'cancelled'
            ",
        )
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(|row| row_to_stay(&row))
        .transpose()
    }

    async fn set_stay_status(
        &self,
        stay_id: i64,
        status: StayStatus,
        total_amount: Option<f64>,
    ) -> Result<LocalStay, StoreError> {
        let updated = sqlx::query(
            "UPDATE stays SET status = ?, total_amount = COALESCE(?, total_amount) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(total_amount)
        .bind(stay_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("stay {stay_id}")));
        }

        self.find_stay(stay_id).await
    }

    async fn set_room_status(
        &self,
        room_number: &str,
        status: RoomStatus,
    ) -> Result<Option<RoomStatus>, StoreError> {
        let mut tx = self.pool.begin_with(BEGIN_IMMEDIATE).await.map_err(db_err)?;

        let previous: Option<(String,)> =
            sqlx::query_as("SELECT status FROM rooms WHERE room_number = ?")
                .bind(room_number)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;

        sqlx::query(
            r"
            INSERT INTO rooms (room_number, status) VALUES (?, ?)
            ON CONFLICT (room_number) DO UPDATE SET status = excluded.status
            ",
        )
        .bind(room_number)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        previous.map(|(s,)| RoomStatus::parse(&s)).transpose()
    }
}

#[async_trait]
impl HousekeepingService for SqliteStore {
    async fn create_cleaning_task(
        &self,
        room_number: &str,
        task_type: TaskType,
        scheduled_for: DateTime<Utc>,
        priority: TaskPriority,
    ) -> ServiceResult<CleaningTask> {
        let result = sqlx::query(
            r"
            INSERT INTO cleaning_tasks (room_number, task_type, scheduled_for, priority)
            VALUES (?, ?, ?, ?)
            ",
        )
        .bind(room_number)
        .bind(task_type.as_str())
        .bind(scheduled_for)
        .bind(priority.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        tracing::info!(
            room_number,
            task_type = task_type.as_str(),
            priority = priority.as_str(),
            "Cleaning task created"
        );

        Ok(CleaningTask {
            id: result.last_insert_rowid(),
            room_number: room_number.to_string(),
            task_type,
            scheduled_for,
            priority,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code unwraps for brevity
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::{Path, PathBuf};

    fn row_to_task(row: &SqliteRow) -> Result<CleaningTask, StoreError> {
        let task_type: String = row.try_get("task_type").map_err(db_err)?;
        let priority: String = row.try_get("priority").map_err(db_err)?;
        Ok(CleaningTask {
            id: row.try_get("id").map_err(db_err)?,
            room_number: row.try_get("room_number").map_err(db_err)?,
            task_type: TaskType::parse(&task_type)?,
            scheduled_for: row.try_get("scheduled_for").map_err(db_err)?,
            priority: TaskPriority::parse(&priority)?,
        })
    }

    fn profile(name: &str, email: Option<&str>) -> GuestProfile {
        GuestProfile {
            full_name: name.to_string(),
            email: email.map(str::to_string),
            phone: None,
        }
    }

    fn draft(reservation_id: &str, guest_id: i64) -> StayDraft {
        StayDraft {
            reservation_id: reservation_id.to_string(),
            guest_id,
            room_number: None,
            planned_check_in: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            planned_check_out: None,
            total_amount: 0.0,
        }
    }

    #[tokio::test]
    async fn second_identical_upsert_is_skipped() {
        let store = SqliteStore::in_memory().await.unwrap();
        let guest = store.upsert_guest(&profile("A", None)).await.unwrap();

        let first = store
            .upsert_stay_for_reservation(&draft("R-1", guest.id))
            .await
            .unwrap();
        let second = store
            .upsert_stay_for_reservation(&draft("R-1", guest.id))
            .await
            .unwrap();

        assert_eq!(first.action, UpsertAction::Created);
        assert_eq!(first.stay.status, StayStatus::Confirmed);
        assert_eq!(second.action, UpsertAction::Skipped);
        assert_eq!(second.stay.id, first.stay.id);
        assert_eq!(stay_count(&store, "R-1").await, 1);
    }

    #[tokio::test]
    async fn changed_draft_updates_in_place() {
        let store = SqliteStore::in_memory().await.unwrap();
        let guest = store.upsert_guest(&profile("A", None)).await.unwrap();
        let created = store
            .upsert_stay_for_reservation(&draft("R-1", guest.id))
            .await
            .unwrap();

        let mut changed = draft("R-1", guest.id);
        changed.room_number = Some("204".to_string());
        let updated = store.upsert_stay_for_reservation(&changed).await.unwrap();

        assert_eq!(updated.action, UpsertAction::Updated);
        assert_eq!(updated.stay.id, created.stay.id);
        let stored = store.find_active_stay("R-1").await.unwrap().unwrap();
        assert_eq!(stored.room_number.as_deref(), Some("204"));
    }

    /// File database shared by several pooled connections, removed on drop.
    struct FileDb {
        path: PathBuf,
        store: SqliteStore,
    }

    impl FileDb {
        async fn open(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "frontdesk-sync-{name}-{}.db",
                std::process::id()
            ));
            remove_db_files(&path);
            let url = format!("sqlite://{}?mode=rwc", path.display());
            let store = SqliteStore::connect(&url, 5).await.unwrap();
            store.migrate().await.unwrap();
            Self { path, store }
        }
    }

    impl Drop for FileDb {
        fn drop(&mut self) {
            remove_db_files(&self.path);
        }
    }

    fn remove_db_files(path: &Path) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.as_os_str().to_owned();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }

    async fn stay_count(store: &SqliteStore, reservation_id: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM stays WHERE reservation_id = ?")
            .bind(reservation_id)
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    /// Runs one upsert per draft on its own task and collects the results.
    async fn upsert_all(
        store: &SqliteStore,
        drafts: Vec<StayDraft>,
    ) -> Vec<Result<UpsertOutcome, StoreError>> {
        let handles: Vec<_> = drafts
            .into_iter()
            .map(|d| {
                let store = store.clone();
                tokio::spawn(async move { store.upsert_stay_for_reservation(&d).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_upserts_on_a_file_db_create_one_row() {
        let db = FileDb::open("same-reservation").await;
        let guest = db.store.upsert_guest(&profile("A", None)).await.unwrap();

        for round in 0..10 {
            let reservation_id = format!("R-{round}");
            let drafts = (0..4).map(|_| draft(&reservation_id, guest.id)).collect();

            let results = upsert_all(&db.store, drafts).await;

            let mut actions: Vec<_> = results.into_iter().map(|r| r.unwrap().action).collect();
            actions.sort_by_key(UpsertAction::as_str);
            assert_eq!(
                actions,
                [
                    UpsertAction::Created,
                    UpsertAction::Skipped,
                    UpsertAction::Skipped,
                    UpsertAction::Skipped
                ],
                "round {round}"
            );
            assert_eq!(stay_count(&db.store, &reservation_id).await, 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn writers_to_different_reservations_do_not_fail() {
        let db = FileDb::open("distinct-reservations").await;
        let guest = db.store.upsert_guest(&profile("A", None)).await.unwrap();

        for round in 0..10 {
            let drafts = (0..4)
                .map(|i| draft(&format!("R-{round}-{i}"), guest.id))
                .collect();

            for result in upsert_all(&db.store, drafts).await {
                assert_eq!(result.unwrap().action, UpsertAction::Created);
            }
        }

        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stays")
            .fetch_one(db.store.pool())
            .await
            .unwrap();
        assert_eq!(total, 40);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_room_status_writes_all_succeed() {
        let db = FileDb::open("room-status").await;

        let handles: Vec<_> = [RoomStatus::Clean, RoomStatus::Dirty, RoomStatus::Inspected]
            .into_iter()
            .cycle()
            .take(8)
            .map(|status| {
                let store = db.store.clone();
                tokio::spawn(async move { store.set_room_status("101", status).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn unique_index_rejects_second_active_stay() {
        let store = SqliteStore::in_memory().await.unwrap();
        let guest = store.upsert_guest(&profile("A", None)).await.unwrap();
        store
            .upsert_stay_for_reservation(&draft("R-1", guest.id))
            .await
            .unwrap();

        let err = sqlx::query(
            r"
            INSERT INTO stays (reservation_id, guest_id, planned_check_in, status)
            VALUES ('R-1', ?, '2024-01-15', 'confirmed')
            ",
        )
        .bind(guest.id)
        .execute(store.pool())
        .await
        .unwrap_err();

        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn cancelled_stay_frees_the_reservation_id() {
        let store = SqliteStore::in_memory().await.unwrap();
        let guest = store.upsert_guest(&profile("A", None)).await.unwrap();
        let first = store
            .upsert_stay_for_reservation(&draft("R-1", guest.id))
            .await
            .unwrap();
        store
            .set_stay_status(first.stay.id, StayStatus::Cancelled, None)
            .await
            .unwrap();

        assert!(store.find_active_stay("R-1").await.unwrap().is_none());

        let again = store
            .upsert_stay_for_reservation(&draft("R-1", guest.id))
            .await
            .unwrap();
        assert_eq!(again.action, UpsertAction::Created);
        assert_eq!(stay_count(&store, "R-1").await, 2);
    }

    #[tokio::test]
    async fn guests_are_deduplicated_by_email() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = store
            .upsert_guest(&profile("Ann", Some("ann@example.com")))
            .await
            .unwrap();
        let b = store
            .upsert_guest(&profile("Ann B.", Some("ann@example.com")))
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn set_stay_status_on_missing_stay_is_not_found() {
        let store = SqliteStore::in_memory().await.unwrap();
        let err = store
            .set_stay_status(99, StayStatus::CheckedOut, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn room_status_returns_previous() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(
            store.set_room_status("101", RoomStatus::Clean).await.unwrap(),
            None
        );
        assert_eq!(
            store.set_room_status("101", RoomStatus::Dirty).await.unwrap(),
            Some(RoomStatus::Clean)
        );
    }

    #[tokio::test]
    async fn cleaning_tasks_are_listed_per_room() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        store
            .create_cleaning_task("101", TaskType::CheckoutClean, now, TaskPriority::High)
            .await
            .unwrap();
        store
            .create_cleaning_task("102", TaskType::StandardClean, now, TaskPriority::Normal)
            .await
            .unwrap();

        let rows = sqlx::query(
            "SELECT id, room_number, task_type, scheduled_for, priority \
             FROM cleaning_tasks WHERE room_number = ? ORDER BY id",
        )
        .bind("101")
        .fetch_all(store.pool())
        .await
        .unwrap();
        let tasks: Vec<CleaningTask> = rows.iter().map(|r| row_to_task(r).unwrap()).collect();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_type, TaskType::CheckoutClean);
        assert_eq!(tasks[0].priority, TaskPriority::High);
    }
}
