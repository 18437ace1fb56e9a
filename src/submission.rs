//! Submission handling: validate, split, then run the configured write path.
//!
//! The transactional path writes the registration row first, then fans out
//! one insert per associated violence selection against the same
//! transaction. Every dependent insert is allowed to settle before the
//! outcome is decided, so a failure report always lists every failed
//! selection. Any failure rolls back the whole submission.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{AppConfig, RunMode, StoreBackend};
use crate::error::RegistrationError;
use crate::model::{SubmissionPlan, TableLayout, ViolenceSelection};
use crate::response::{DryRunEcho, SubmissionResponse};
use crate::schema::FormSchema;
use crate::store::{error_text, MemoryStore, PgRegistryStore, RegistryStore, RegistryTransaction};
use crate::validation::validate_submission;

pub const SUCCESS_MESSAGE: &str = "Se insertó el registro y las violencias asociadas exitosamente";
pub const REGISTRATION_FAILED_MESSAGE: &str =
    "Se produjo un error al intentar insertar un registro en la base de datos";
pub const DEPENDENTS_FAILED_MESSAGE: &str =
    "Algo ocurrió al insertar el registro en la base de datos";

/// A dependent insert that failed, tied to the selection it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedInsert {
    pub associated_violence: ViolenceSelection,
    pub error: String,
}

/// The two write paths a submission can take.
#[derive(Clone)]
pub enum WritePath {
    /// Dry-run: nothing is written and no connection is made.
    EchoOnly,
    TransactionalWrite(Arc<dyn RegistryStore>),
}

impl WritePath {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        if config.mode == RunMode::DryRun {
            return Ok(Self::EchoOnly);
        }
        let store: Arc<dyn RegistryStore> = match config.store {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Postgres => Arc::new(PgRegistryStore::connect_lazy(
                config.database_url()?,
                config.max_connections,
            )?),
        };
        Ok(Self::TransactionalWrite(store))
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::EchoOnly => "dry-run",
            Self::TransactionalWrite(store) => store.backend(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    DryRun {
        first_query: String,
    },
    Committed {
        registration_id: i64,
        dependents: usize,
        data: Value,
    },
    /// The registration insert wrote nothing or returned no id.
    RegistrationRejected,
    DependentsFailed(Vec<FailedInsert>),
    /// Unexpected database error; the transaction was rolled back.
    Aborted(String),
}

impl SubmissionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::DryRun { .. } | Self::Committed { .. })
    }
}

impl From<SubmissionOutcome> for SubmissionResponse {
    fn from(outcome: SubmissionOutcome) -> Self {
        match outcome {
            SubmissionOutcome::DryRun { first_query } => Self {
                success: true,
                result: Some(DryRunEcho { first_query }),
                ..Default::default()
            },
            SubmissionOutcome::Committed { data, .. } => Self {
                success: true,
                message: Some(SUCCESS_MESSAGE.to_string()),
                data: Some(data),
                ..Default::default()
            },
            SubmissionOutcome::RegistrationRejected => Self::failure(REGISTRATION_FAILED_MESSAGE),
            SubmissionOutcome::DependentsFailed(failures) => Self {
                errors: Some(failures),
                ..Self::failure(DEPENDENTS_FAILED_MESSAGE)
            },
            SubmissionOutcome::Aborted(message) => Self::failure(message),
        }
    }
}

pub struct SubmissionService {
    schema: Arc<FormSchema>,
    layout: TableLayout,
    write_path: WritePath,
}

impl SubmissionService {
    pub fn new(schema: Arc<FormSchema>, layout: TableLayout, write_path: WritePath) -> Self {
        Self {
            schema,
            layout,
            write_path,
        }
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn write_path(&self) -> &WritePath {
        &self.write_path
    }

    /// Validation and body errors are returned as `Err` before the store is
    /// touched; everything after that is an outcome.
    #[instrument(skip_all, fields(submission_id = %Uuid::new_v4()))]
    pub async fn submit(&self, payload: Value) -> Result<SubmissionOutcome, RegistrationError> {
        let record = payload
            .as_object()
            .ok_or_else(|| RegistrationError::InvalidBody("expected a JSON object".into()))?;

        if let Err(failure) = validate_submission(&self.schema, record) {
            warn!(fields = ?failure.field_errors, "submission failed validation");
            return Err(failure.into());
        }

        let plan = SubmissionPlan::build(record, &self.schema, &self.layout)?;
        debug!(registration = %plan.registration, selections = ?plan.selections, "split submission");

        match &self.write_path {
            WritePath::EchoOnly => {
                info!("dry-run mode, nothing written");
                Ok(SubmissionOutcome::DryRun {
                    first_query: plan.registration.render(),
                })
            }
            WritePath::TransactionalWrite(store) => {
                Ok(self.write(store.as_ref(), plan, payload).await)
            }
        }
    }

    async fn write(
        &self,
        store: &dyn RegistryStore,
        plan: SubmissionPlan,
        data: Value,
    ) -> SubmissionOutcome {
        let mut tx = match store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                let message = error_text(&e);
                error!(error = %message, "could not start transaction");
                return SubmissionOutcome::Aborted(message);
            }
        };

        let inserted = match tx.insert(&plan.registration).await {
            Ok(inserted) => inserted,
            Err(e) => return abort(tx, e).await,
        };
        debug!(?inserted, "registration insert finished");

        let registration_id = match inserted.generated_id {
            Some(id) if inserted.rows_affected > 0 => id,
            _ => {
                warn!(
                    rows_affected = inserted.rows_affected,
                    "registration insert wrote nothing, rolling back"
                );
                rollback(tx).await;
                return SubmissionOutcome::RegistrationRejected;
            }
        };

        let tx = Mutex::new(tx);
        let failures = insert_dependents(&tx, &self.layout, registration_id, &plan.selections).await;
        let tx = tx.into_inner();

        if !failures.is_empty() {
            warn!(
                registration_id,
                failed = failures.len(),
                total = plan.selections.len(),
                "associated violence inserts failed, rolling back"
            );
            rollback(tx).await;
            return SubmissionOutcome::DependentsFailed(failures);
        }

        if let Err(e) = tx.commit().await {
            let message = error_text(&e);
            error!(registration_id, error = %message, "commit failed");
            return SubmissionOutcome::Aborted(message);
        }

        info!(
            registration_id,
            dependents = plan.selections.len(),
            "registration committed"
        );
        SubmissionOutcome::Committed {
            registration_id,
            dependents: plan.selections.len(),
            data,
        }
    }
}

/// Issue every dependent insert at once and wait for all of them. Each runs
/// isolated, so one failure does not make the others fail with it.
async fn insert_dependents(
    tx: &Mutex<Box<dyn RegistryTransaction>>,
    layout: &TableLayout,
    registration_id: i64,
    selections: &[ViolenceSelection],
) -> Vec<FailedInsert> {
    let inserts = selections.iter().map(|selection| async move {
        let statement = layout.violence_insert(registration_id, selection);
        let result = tx.lock().await.insert_isolated(&statement).await;
        let error = match result {
            Ok(inserted) if inserted.rows_affected > 0 => return None,
            Ok(_) => "no rows were inserted".to_string(),
            Err(e) => error_text(&e),
        };
        error!(code = %selection.value, %error, "associated violence insert failed");
        Some(FailedInsert {
            associated_violence: selection.clone(),
            error,
        })
    });

    join_all(inserts).await.into_iter().flatten().collect()
}

async fn abort(tx: Box<dyn RegistryTransaction>, e: anyhow::Error) -> SubmissionOutcome {
    let message = error_text(&e);
    error!(error = %message, "database error, rolling back");
    rollback(tx).await;
    SubmissionOutcome::Aborted(message)
}

async fn rollback(tx: Box<dyn RegistryTransaction>) {
    if let Err(e) = tx.rollback().await {
        error!(error = %error_text(&e), "rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FaultKind, MemoryStats};
    use serde_json::json;

    const SCHEMA: &str = r#"
steps:
  - title: Persona
    fields:
      - { name: nombre, kind: text }
  - title: Violencia
    fields:
      - name: violencia_asociada
        kind: multi_select
        required: false
        options:
          - { value: "1", label: "Física" }
          - { value: "2", label: "Psicológica" }
          - { value: "3", label: "Sexual" }
"#;

    const REGISTRATIONS: &str = "registro_violencia";
    const VIOLENCES: &str = "violencia_asociada";

    fn service(write_path: WritePath) -> SubmissionService {
        SubmissionService::new(
            Arc::new(FormSchema::from_yaml_str(SCHEMA).unwrap()),
            TableLayout::default(),
            write_path,
        )
    }

    fn live(store: &MemoryStore) -> SubmissionService {
        service(WritePath::TransactionalWrite(Arc::new(store.clone())))
    }

    fn ana() -> Value {
        json!({
            "nombre": "Ana",
            "violencia_asociada": [
                {"value": "1", "label": "Física"},
                {"value": "2", "label": "Psicológica"}
            ]
        })
    }

    #[tokio::test]
    async fn commits_registration_and_all_dependents() {
        let store = MemoryStore::new();
        let outcome = live(&store).submit(ana()).await.unwrap();

        assert_eq!(
            outcome,
            SubmissionOutcome::Committed {
                registration_id: 1,
                dependents: 2,
                data: ana(),
            }
        );
        assert_eq!(store.row_count(REGISTRATIONS), 1);
        let dependents = store.rows(VIOLENCES);
        assert_eq!(dependents.len(), 2);
        assert!(dependents
            .iter()
            .all(|row| row["numero_violencia"] == crate::sql::SqlValue::Int(1)));
        assert_eq!(store.stats().open_connections, 0);
    }

    #[tokio::test]
    async fn validation_failure_never_touches_the_store() {
        let store = MemoryStore::new();
        let err = live(&store)
            .submit(json!({"violencia_asociada": []}))
            .await
            .unwrap_err();

        assert!(matches!(err, RegistrationError::Validation(_)));
        assert_eq!(store.stats(), MemoryStats::default());
    }

    #[tokio::test]
    async fn non_object_body_is_rejected() {
        let store = MemoryStore::new();
        let err = live(&store).submit(json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidBody(_)));
        assert_eq!(store.stats().begun, 0);
    }

    #[tokio::test]
    async fn no_selections_commits_only_the_registration() {
        let store = MemoryStore::new();
        let outcome = live(&store).submit(json!({"nombre": "Ana"})).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(store.row_count(REGISTRATIONS), 1);
        assert_eq!(store.row_count(VIOLENCES), 0);
        assert_eq!(store.stats().committed, 1);
    }

    #[tokio::test]
    async fn zero_row_registration_rolls_back_without_dependents() {
        let store = MemoryStore::new();
        store.fail_inserts_into(REGISTRATIONS, FaultKind::NoRows);

        let outcome = live(&store).submit(ana()).await.unwrap();

        assert_eq!(outcome, SubmissionOutcome::RegistrationRejected);
        assert_eq!(store.insert_attempts(VIOLENCES), 0);
        assert_eq!(store.stats().rolled_back, 1);
        assert_eq!(store.stats().open_connections, 0);
    }

    #[tokio::test]
    async fn registration_error_is_reported_verbatim() {
        let store = MemoryStore::new();
        store.fail_inserts_into(
            REGISTRATIONS,
            FaultKind::Error("duplicate key value violates unique constraint".into()),
        );

        let outcome = live(&store).submit(ana()).await.unwrap();

        assert_eq!(
            outcome,
            SubmissionOutcome::Aborted("duplicate key value violates unique constraint".into())
        );
        assert_eq!(store.insert_attempts(VIOLENCES), 0);
        assert_eq!(store.stats().rolled_back, 1);
        assert_eq!(store.stats().open_connections, 0);
    }

    #[tokio::test]
    async fn one_failed_dependent_rolls_back_everything() {
        let store = MemoryStore::new();
        store.fail_inserts_where(
            VIOLENCES,
            "cod_violencia_asociada",
            "2",
            FaultKind::Error("foreign key violation".into()),
        );

        let payload = json!({
            "nombre": "Ana",
            "violencia_asociada": [
                {"value": "1", "label": "Física"},
                {"value": "2", "label": "Psicológica"},
                {"value": "3", "label": "Sexual"}
            ]
        });
        let outcome = live(&store).submit(payload).await.unwrap();

        assert_eq!(
            outcome,
            SubmissionOutcome::DependentsFailed(vec![FailedInsert {
                associated_violence: ViolenceSelection {
                    value: "2".into(),
                    label: "Psicológica".into(),
                },
                error: "foreign key violation".into(),
            }])
        );
        // every insert was attempted before deciding
        assert_eq!(store.insert_attempts(VIOLENCES), 3);
        assert_eq!(store.row_count(REGISTRATIONS), 0);
        assert_eq!(store.row_count(VIOLENCES), 0);
        assert_eq!(store.stats().open_connections, 0);
    }

    #[tokio::test]
    async fn failed_dependent_does_not_fail_the_rest_of_an_aborting_transaction() {
        let store = MemoryStore::new();
        store.abort_transactions_on_error();
        store.fail_inserts_where(
            VIOLENCES,
            "cod_violencia_asociada",
            "2",
            FaultKind::Error("violates check constraint".into()),
        );

        // the failing selection comes first
        let payload = json!({
            "nombre": "Ana",
            "violencia_asociada": [
                {"value": "2", "label": "Psicológica"},
                {"value": "1", "label": "Física"},
                {"value": "3", "label": "Sexual"}
            ]
        });
        let outcome = live(&store).submit(payload).await.unwrap();

        let SubmissionOutcome::DependentsFailed(failures) = outcome else {
            panic!("expected dependent failures");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].associated_violence.value, "2");
        assert_eq!(failures[0].error, "violates check constraint");
        assert_eq!(store.insert_attempts(VIOLENCES), 3);
        assert_eq!(store.row_count(REGISTRATIONS), 0);
        assert_eq!(store.row_count(VIOLENCES), 0);
    }

    #[tokio::test]
    async fn every_failed_dependent_is_reported() {
        let store = MemoryStore::new();
        store.fail_inserts_into(VIOLENCES, FaultKind::Error("tabla bloqueada".into()));

        let outcome = live(&store).submit(ana()).await.unwrap();
        let SubmissionOutcome::DependentsFailed(failures) = outcome else {
            panic!("expected dependent failures");
        };
        let codes: Vec<&str> = failures
            .iter()
            .map(|f| f.associated_violence.value.as_str())
            .collect();
        assert_eq!(codes, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn resubmission_creates_a_second_registration() {
        let store = MemoryStore::new();
        let service = live(&store);
        service.submit(ana()).await.unwrap();
        let second = service.submit(ana()).await.unwrap();

        assert!(matches!(
            second,
            SubmissionOutcome::Committed {
                registration_id: 2,
                ..
            }
        ));
        assert_eq!(store.row_count(REGISTRATIONS), 2);
        assert_eq!(store.row_count(VIOLENCES), 4);
    }

    #[tokio::test]
    async fn dry_run_echoes_the_registration_insert() {
        let outcome = service(WritePath::EchoOnly).submit(ana()).await.unwrap();
        assert_eq!(
            outcome,
            SubmissionOutcome::DryRun {
                first_query: "INSERT INTO \"registro_violencia\" (\"nombre\") VALUES ('Ana') \
                              RETURNING \"numero_violencia\""
                    .into(),
            }
        );
        assert_eq!(WritePath::EchoOnly.describe(), "dry-run");
    }

    #[test]
    fn outcomes_map_to_envelopes() {
        let response = SubmissionResponse::from(SubmissionOutcome::RegistrationRejected);
        assert!(!response.success);
        assert_eq!(
            response.error_message.as_deref(),
            Some(REGISTRATION_FAILED_MESSAGE)
        );

        let response = SubmissionResponse::from(SubmissionOutcome::Aborted("boom".into()));
        assert_eq!(response.error_message.as_deref(), Some("boom"));
        assert!(response.errors.is_none());
    }
}
