// src/bq/mod.rs

use arrow::record_batch::RecordBatch;
use reqwest::blocking::{Client, Response};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::BigQueryConfig;
use crate::error::{Result, RxError};

pub mod response;

use response::{rows_to_batch, ErrorEnvelope, QueryResponse, TableRow, TableSchema};

/// Longest server-side wait per call; the client timeout is the overall deadline.
const SERVER_WAIT: Duration = Duration::from_secs(10);

/// Anything that can run an aggregation query and hand back one table.
pub trait QueryBackend {
    fn query(&self, sql: &str) -> Result<RecordBatch>;
}

/// Blocking client for the BigQuery v2 REST API (`jobs.query` plus
/// `jobs.getQueryResults` paging). Auth is a caller-supplied bearer token,
/// only demanded once a query is actually issued.
pub struct BigQueryClient {
    http: Client,
    endpoint: Url,
    project: String,
    token: Option<String>,
    max_results: u32,
    timeout: Duration,
}

impl BigQueryClient {
    pub fn new(cfg: &BigQueryConfig) -> Result<Self> {
        let timeout = Duration::from_secs(cfg.timeout_secs);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RxError::Remote(format!("building HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            project: cfg.project.clone(),
            token: cfg.access_token.clone(),
            max_results: cfg.max_results,
            timeout,
        })
    }

    fn token(&self) -> Result<&str> {
        self.token.as_deref().ok_or_else(|| {
            RxError::Config(format!(
                "no BigQuery access token; set {}",
                crate::config::TOKEN_ENV
            ))
        })
    }

    /// `timeoutMs` sent with each call, kept under the HTTP timeout so a slow
    /// job comes back as `jobComplete: false` rather than a dropped request.
    fn server_wait_ms(&self) -> u64 {
        (self.timeout / 2).min(SERVER_WAIT).as_millis() as u64
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.endpoint
            .join(path)
            .map_err(|e| RxError::Config(format!("bad endpoint path {}: {}", path, e)))
    }

    fn read(resp: reqwest::Result<Response>, what: &str) -> Result<QueryResponse> {
        let resp = resp.map_err(|e| RxError::Remote(format!("{}: {}", what, e)))?;
        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| RxError::Remote(format!("{}: reading body: {}", what, e)))?;
        if !status.is_success() {
            let msg = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|env| {
                    format!(
                        "{} ({})",
                        env.error.message,
                        env.error.code.unwrap_or(status.as_u16())
                    )
                })
                .unwrap_or(body);
            return Err(RxError::Remote(format!("{}: HTTP {}: {}", what, status, msg)));
        }
        let parsed: QueryResponse = serde_json::from_str(&body)
            .map_err(|e| RxError::Remote(format!("{}: decoding response: {}", what, e)))?;
        parsed.check_errors()?;
        Ok(parsed)
    }

    fn start(&self, sql: &str) -> Result<QueryResponse> {
        let url = self.url(&format!("projects/{}/queries", self.project))?;
        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "maxResults": self.max_results,
            "timeoutMs": self.server_wait_ms(),
        });
        Self::read(
            self.http
                .post(url)
                .bearer_auth(self.token()?)
                .json(&body)
                .send(),
            "jobs.query",
        )
    }

    fn page(
        &self,
        job_id: &str,
        location: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<QueryResponse> {
        let url = self.url(&format!("projects/{}/queries/{}", self.project, job_id))?;
        let mut params: Vec<(&str, String)> = vec![
            ("maxResults", self.max_results.to_string()),
            ("timeoutMs", self.server_wait_ms().to_string()),
        ];
        if let Some(loc) = location {
            params.push(("location", loc.to_string()));
        }
        if let Some(tok) = page_token {
            params.push(("pageToken", tok.to_string()));
        }
        Self::read(
            self.http
                .get(url)
                .bearer_auth(self.token()?)
                .query(&params)
                .send(),
            "jobs.getQueryResults",
        )
    }
}

/// Poll an unfinished job and follow `pageToken`s until every row is in.
/// `fetch` issues `getQueryResults` with the given page token.
fn drain_pages<F>(
    job_id: &str,
    mut resp: QueryResponse,
    timeout: Duration,
    mut fetch: F,
) -> Result<(TableSchema, Vec<TableRow>)>
where
    F: FnMut(Option<&str>) -> Result<QueryResponse>,
{
    let started = Instant::now();
    let mut schema: Option<TableSchema> = None;
    let mut rows: Vec<TableRow> = Vec::new();
    loop {
        if !resp.job_complete {
            if started.elapsed() >= timeout {
                return Err(RxError::Remote(format!(
                    "job {} did not complete within {:?}",
                    job_id, timeout
                )));
            }
            debug!(job = %job_id, "job still running");
            resp = fetch(None)?;
            continue;
        }
        if schema.is_none() {
            schema = resp.schema.take();
        }
        rows.append(&mut resp.rows);
        match resp.page_token.take() {
            Some(tok) => {
                debug!(job = %job_id, fetched = rows.len(), "next page");
                resp = fetch(Some(&tok))?;
            }
            None => break,
        }
    }
    let schema =
        schema.ok_or_else(|| RxError::Remote(format!("job {} returned no schema", job_id)))?;
    Ok((schema, rows))
}

impl QueryBackend for BigQueryClient {
    #[instrument(level = "info", skip_all)]
    fn query(&self, sql: &str) -> Result<RecordBatch> {
        let started = Instant::now();
        let resp = self.start(sql)?;
        let job = resp
            .job_reference
            .clone()
            .ok_or_else(|| RxError::Remote("response carried no jobReference".to_string()))?;

        let (schema, rows) = drain_pages(&job.job_id, resp, self.timeout, |tok| {
            self.page(&job.job_id, job.location.as_deref(), tok)
        })?;
        let batch = rows_to_batch(&schema, &rows)?;
        info!(
            job = %job.job_id,
            rows = batch.num_rows(),
            elapsed = ?started.elapsed(),
            "query finished"
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_is_config_error() {
        let client = BigQueryClient::new(&BigQueryConfig::default()).unwrap();
        assert!(matches!(
            client.query("SELECT 1"),
            Err(RxError::Config(_))
        ));
    }

    #[test]
    fn endpoint_paths_join_under_v2() {
        let cfg = BigQueryConfig {
            access_token: Some("t".to_string()),
            ..BigQueryConfig::default()
        };
        let client = BigQueryClient::new(&cfg).unwrap();
        let url = client.url("projects/ebmdatalab/queries/abc").unwrap();
        assert_eq!(
            url.as_str(),
            "https://bigquery.googleapis.com/bigquery/v2/projects/ebmdatalab/queries/abc"
        );
    }

    fn canned(body: &str) -> QueryResponse {
        serde_json::from_str(body).unwrap()
    }

    const PENDING: &str = r#"{"jobReference": {"jobId": "job_1"}, "jobComplete": false}"#;

    #[test]
    fn polls_then_follows_page_tokens() {
        let mut pages = vec![
            canned(
                r#"{"jobComplete": true, "pageToken": "p2",
                    "schema": {"fields": [{"name": "pct", "type": "STRING"}]},
                    "rows": [{"f": [{"v": "15N"}]}, {"f": [{"v": "99A"}]}]}"#,
            ),
            canned(r#"{"jobComplete": true, "rows": [{"f": [{"v": "00C"}]}]}"#),
        ]
        .into_iter();
        let mut asked: Vec<Option<String>> = Vec::new();

        let (schema, rows) = drain_pages("job_1", canned(PENDING), Duration::from_secs(60), |tok| {
            asked.push(tok.map(str::to_string));
            Ok(pages.next().unwrap())
        })
        .unwrap();

        assert_eq!(asked, vec![None, Some("p2".to_string())]);
        assert_eq!(schema.fields[0].name, "pct");
        let batch = rows_to_batch(&schema, &rows).unwrap();
        assert_eq!(batch.num_rows(), 3);
    }

    #[test]
    fn schema_may_arrive_on_a_later_page() {
        let first = canned(r#"{"jobComplete": true, "pageToken": "p2"}"#);
        let (schema, rows) = drain_pages("job_1", first, Duration::from_secs(60), |_| {
            Ok(canned(
                r#"{"jobComplete": true,
                    "schema": {"fields": [{"name": "n", "type": "INTEGER"}]},
                    "rows": [{"f": [{"v": "1"}]}]}"#,
            ))
        })
        .unwrap();
        assert_eq!(schema.fields[0].field_type, "INTEGER");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn pending_past_deadline_is_remote_error() {
        let mut calls = 0;
        let res = drain_pages("job_1", canned(PENDING), Duration::ZERO, |_| {
            calls += 1;
            Ok(canned(PENDING))
        });
        assert!(matches!(res, Err(RxError::Remote(_))));
        assert_eq!(calls, 0);
    }

    #[test]
    fn server_wait_stays_under_client_timeout() {
        let client = BigQueryClient::new(&BigQueryConfig::default()).unwrap();
        assert_eq!(client.server_wait_ms(), 10_000);

        let quick = BigQueryClient::new(&BigQueryConfig {
            timeout_secs: 4,
            ..BigQueryConfig::default()
        })
        .unwrap();
        assert_eq!(quick.server_wait_ms(), 2_000);
    }

    #[test]
    fn unreachable_endpoint_is_remote_error() {
        let cfg = BigQueryConfig {
            endpoint: Url::parse("http://127.0.0.1:9/bigquery/v2/").unwrap(),
            access_token: Some("t".to_string()),
            timeout_secs: 2,
            ..BigQueryConfig::default()
        };
        let client = BigQueryClient::new(&cfg).unwrap();
        assert!(matches!(
            client.query("SELECT 1"),
            Err(RxError::Remote(_))
        ));
    }
}
