//! Job table operations.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;
use vs_core::{Error, Job, JobFilter, JobId, Result};

const COLS: &str = "id, source, target, options, state, progress, error, output,
    created_at, started_at, completed_at";

fn conversion_err(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_time(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_opt_time(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|v| {
        DateTime::parse_from_rfc3339(&v)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

fn parse_json<T: serde::de::DeserializeOwned>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|v| serde_json::from_str(&v).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn parse_str<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = Error>,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conversion_err(idx, e))
}

pub fn job_from_row(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id).map_err(|e| conversion_err(0, e))?;
    let source: String = row.get(1)?;
    let output: Option<String> = row.get(7)?;
    let progress: f64 = row.get(5)?;

    Ok(Job {
        id: JobId::from(id),
        source: PathBuf::from(source),
        target: parse_str(row, 2)?,
        options: parse_json(row, 3)?.unwrap_or_default(),
        state: parse_str(row, 4)?,
        progress: progress as f32,
        error: parse_json(row, 6)?,
        output: output.map(PathBuf::from),
        created_at: parse_time(row, 8)?,
        started_at: parse_opt_time(row, 9)?,
        completed_at: parse_opt_time(row, 10)?,
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::database(e.to_string()))
}

pub fn insert_job(conn: &Connection, job: &Job) -> Result<()> {
    conn.execute(
        "INSERT INTO jobs (id, source, target, options, state, progress, error, output,
                           created_at, started_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            job.id.to_string(),
            job.source.to_string_lossy().into_owned(),
            job.target.to_string(),
            to_json(&job.options)?,
            job.state.as_str(),
            f64::from(job.progress),
            job.error.as_ref().map(to_json).transpose()?,
            job.output.as_ref().map(|p| p.to_string_lossy().into_owned()),
            job.created_at.to_rfc3339(),
            job.started_at.map(|t| t.to_rfc3339()),
            job.completed_at.map(|t| t.to_rfc3339()),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation => {
            Error::Conflict(format!("job {} already exists", job.id))
        }
        other => Error::database(other.to_string()),
    })?;
    Ok(())
}

pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<Job>> {
    let q = format!("SELECT {COLS} FROM jobs WHERE id = ?1");
    conn.query_row(&q, [id.to_string()], job_from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))
}

/// Jobs matching `filter`, in submission order.
pub fn list_jobs(conn: &Connection, filter: &JobFilter) -> Result<Vec<Job>> {
    let q = format!(
        "SELECT {COLS} FROM jobs
         WHERE (?1 IS NULL OR state = ?1)
         ORDER BY seq ASC LIMIT ?2 OFFSET ?3"
    );
    let state = filter.state.map(|s| s.as_str());
    let limit = filter.limit.map_or(-1, |l| l as i64);
    let offset = filter.offset as i64;

    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params![state, limit, offset], job_from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Overwrite the mutable columns of an existing job.
pub fn write_job(conn: &Connection, job: &Job) -> Result<()> {
    let n = conn
        .execute(
            "UPDATE jobs SET state = ?1, progress = ?2, error = ?3, output = ?4,
                started_at = ?5, completed_at = ?6
             WHERE id = ?7",
            rusqlite::params![
                job.state.as_str(),
                f64::from(job.progress),
                job.error.as_ref().map(to_json).transpose()?,
                job.output.as_ref().map(|p| p.to_string_lossy().into_owned()),
                job.started_at.map(|t| t.to_rfc3339()),
                job.completed_at.map(|t| t.to_rfc3339()),
                job.id.to_string(),
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    if n == 0 {
        return Err(Error::not_found("job", job.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;
    use vs_core::media::{Container, Resolution};
    use vs_core::{JobFailure, JobMutation, JobOptions, JobState};

    fn job(name: &str) -> Job {
        Job::new(
            format!("/media/{name}.mkv"),
            Container::Webm,
            JobOptions {
                resolution: Some(Resolution::new(1280, 720)),
                ..JobOptions::default()
            },
        )
    }

    #[test]
    fn insert_and_get_round_trip() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let j = job("a");
        insert_job(&conn, &j).unwrap();

        let found = get_job(&conn, j.id).unwrap().unwrap();
        assert_eq!(found.id, j.id);
        assert_eq!(found.target, Container::Webm);
        assert_eq!(found.options, j.options);
        assert_eq!(found.state, JobState::Queued);
        assert_eq!(found.created_at.timestamp_micros(), j.created_at.timestamp_micros());
    }

    #[test]
    fn missing_job_is_none() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        assert!(get_job(&conn, JobId::new()).unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let j = job("a");
        insert_job(&conn, &j).unwrap();
        assert!(matches!(insert_job(&conn, &j), Err(Error::Conflict(_))));
    }

    #[test]
    fn list_filters_and_pages_in_submission_order() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let jobs: Vec<_> = ["a", "b", "c", "d"].iter().map(|n| job(n)).collect();
        for j in &jobs {
            insert_job(&conn, j).unwrap();
        }

        let mut running = jobs[1].clone();
        running.apply(JobMutation::Start).unwrap();
        write_job(&conn, &running).unwrap();

        let all = list_jobs(&conn, &JobFilter::default()).unwrap();
        assert_eq!(all.iter().map(|j| j.id).collect::<Vec<_>>(), jobs.iter().map(|j| j.id).collect::<Vec<_>>());

        let queued = list_jobs(&conn, &JobFilter::with_state(JobState::Queued)).unwrap();
        assert_eq!(queued.len(), 3);

        let page = list_jobs(
            &conn,
            &JobFilter {
                state: None,
                offset: 1,
                limit: Some(2),
            },
        )
        .unwrap();
        assert_eq!(page.iter().map(|j| j.id).collect::<Vec<_>>(), [jobs[1].id, jobs[2].id]);
    }

    #[test]
    fn failure_detail_is_persisted() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let mut j = job("a");
        insert_job(&conn, &j).unwrap();
        j.apply(JobMutation::Start).unwrap();
        j.apply(JobMutation::Fail(JobFailure::timeout("took too long"))).unwrap();
        write_job(&conn, &j).unwrap();

        let found = get_job(&conn, j.id).unwrap().unwrap();
        assert_eq!(found.state, JobState::Failed);
        assert_eq!(found.error, j.error);
        assert!(found.completed_at.is_some());
    }

    #[test]
    fn writing_unknown_job_is_not_found() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        assert!(matches!(write_job(&conn, &job("x")), Err(Error::NotFound { .. })));
    }
}
