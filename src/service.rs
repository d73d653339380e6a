//! Per-submission orchestration: guard, acquire, provision, run, tear down,
//! evaluate. The pooled connection is held for exactly one submission and
//! released on every exit path by drop.

use deadpool_postgres::{Object, Pool};
use tracing::{error, warn};

use crate::assignment::Assignment;
use crate::config::Limits;
use crate::error::ServiceError;
use crate::evaluator::{self, Verdict};
use crate::guard;
use crate::runner::{self, QueryFailure, QueryOutput};
use crate::sandbox::{self, Sandbox, TablePreview};

#[derive(Clone)]
pub struct QueryService {
    pool: Pool,
    limits: Limits,
}

/// Everything a submission can come back as. Rejections and execution
/// failures are user-recoverable data, not errors.
#[derive(Debug)]
pub enum SubmissionOutcome {
    Rejected { reason: String },
    Failed(QueryFailure),
    Completed { output: QueryOutput, verdict: Verdict },
}

impl QueryService {
    pub fn new(pool: Pool, limits: Limits) -> QueryService {
        QueryService { pool, limits }
    }

    pub async fn submit(
        &self,
        assignment: &Assignment,
        query_text: &str,
    ) -> Result<SubmissionOutcome, ServiceError> {
        let validated = match guard::admit(query_text) {
            Ok(query) => query,
            Err(rejection) => {
                return Ok(SubmissionOutcome::Rejected {
                    reason: rejection.to_string(),
                });
            }
        };

        let mut conn = self.pool.get().await?;
        let sandbox = self.provision_with_retry(&mut conn, assignment).await?;
        let result = runner::run(&mut conn, sandbox.schema(), &validated, &self.limits).await;
        sandbox.teardown(&conn).await;

        Ok(match result {
            Ok(output) => {
                let verdict = evaluator::evaluate(&assignment.expected_output, &output);
                SubmissionOutcome::Completed { output, verdict }
            }
            Err(failure) => SubmissionOutcome::Failed(failure),
        })
    }

    /// Provisioned table schemas plus their first rows, for the sample-data
    /// viewer.
    pub async fn preview(&self, assignment: &Assignment) -> Result<Vec<TablePreview>, ServiceError> {
        let mut conn = self.pool.get().await?;
        let sandbox = self.provision_with_retry(&mut conn, assignment).await?;

        let mut previews = Vec::with_capacity(assignment.sample_tables.len());
        let mut fault = None;
        for table in &assignment.sample_tables {
            match sandbox::inspect_table(
                &conn,
                sandbox.schema(),
                &table.table_name,
                self.limits.preview_rows,
            )
            .await
            {
                Ok(preview) => previews.push(preview),
                Err(err) => {
                    fault = Some(err);
                    break;
                }
            }
        }
        sandbox.teardown(&conn).await;

        match fault {
            Some(err) => Err(ServiceError::Introspect(err)),
            None => Ok(previews),
        }
    }

    /// Provisioning faults are system faults; retry once before surfacing.
    async fn provision_with_retry(
        &self,
        conn: &mut Object,
        assignment: &Assignment,
    ) -> Result<Sandbox, ServiceError> {
        match Sandbox::provision(conn, &assignment.sample_tables).await {
            Ok(sandbox) => Ok(sandbox),
            Err(first) => {
                warn!(
                    assignment = %assignment.id,
                    error = %first,
                    "sandbox provisioning failed, retrying once"
                );
                Sandbox::provision(conn, &assignment.sample_tables)
                    .await
                    .map_err(|second| {
                        error!(
                            assignment = %assignment.id,
                            error = %second,
                            "sandbox provisioning failed twice"
                        );
                        ServiceError::Provision(second)
                    })
            }
        }
    }
}
