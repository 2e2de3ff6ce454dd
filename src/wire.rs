//! Newline-delimited JSON protocol.
//!
//! Each request is one JSON object on its own line, tagged by `"op"`. Each
//! reply is one line of the form `{"status": <u16>, "body": <json>}`, where
//! `status` follows HTTP conventions.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDateTime;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Available {
        #[serde(default)]
        next_number_of_days: Option<u32>,
    },
    Book {
        patient_id: PatientId,
        doctor_id: DoctorId,
        appointment_type: String,
        #[serde(deserialize_with = "datetime")]
        start_time: NaiveDateTime,
    },
    Cancel {
        appointment_id: Ulid,
        #[serde(default)]
        patient_id: Option<PatientId>,
        #[serde(default)]
        doctor_id: Option<DoctorId>,
    },
    Upcoming {
        patient_id: PatientId,
    },
    Appointments {
        #[serde(default)]
        doctor_id: Option<DoctorId>,
        #[serde(default)]
        appointment_type: Option<String>,
    },
    Doctors,
    Doctor {
        id: DoctorId,
    },
    AppointmentTypes,
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Accepts `YYYY-MM-DD HH:MM[:SS]` with either a space or `T` separator.
fn datetime<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw.trim(), f).ok())
        .ok_or_else(|| serde::de::Error::custom(format!("invalid start_time: {raw}")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    pub fn ok<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status, body },
            Err(e) => Self {
                status: 500,
                body: json!({ "error": format!("failed to encode reply: {e}") }),
            },
        }
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            body: Value::Null,
        }
    }

    pub fn error(e: &EngineError) -> Self {
        Self {
            status: e.status().code(),
            body: json!({ "error": e.to_string() }),
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self {
            status: 422,
            body: json!({ "message": "Validation failed", "errors": detail.into() }),
        }
    }
}

fn cancel_scope(patient_id: Option<PatientId>, doctor_id: Option<DoctorId>) -> CancelScope {
    match (patient_id, doctor_id) {
        (Some(p), _) => CancelScope::Patient(p),
        (None, Some(d)) => CancelScope::Doctor(d),
        (None, None) => CancelScope::Any,
    }
}

/// Run one decoded request against the engine.
pub async fn handle_request(engine: &Engine, request: Request) -> Reply {
    let result = match request {
        Request::Available { next_number_of_days } => {
            let days = next_number_of_days.unwrap_or(engine.settings().default_number_of_days);
            engine
                .available_appointments(days)
                .await
                .map(|a| Reply::ok(200, &a))
        }
        Request::Book {
            patient_id,
            doctor_id,
            appointment_type,
            start_time,
        } => engine
            .create_appointment(NewAppointment {
                patient_id,
                doctor_id,
                appointment_type,
                start_time,
            })
            .await
            .map(|a| Reply::ok(201, &a)),
        Request::Cancel {
            appointment_id,
            patient_id,
            doctor_id,
        } => engine
            .cancel_appointment(appointment_id, cancel_scope(patient_id, doctor_id))
            .await
            .map(|_| Reply::no_content()),
        Request::Upcoming { patient_id } => engine
            .upcoming_for_patient(patient_id)
            .await
            .map(|u| Reply::ok(200, &u)),
        Request::Appointments {
            doctor_id,
            appointment_type,
        } => {
            let filter = AppointmentFilter {
                doctor_id,
                appointment_type,
                ..Default::default()
            };
            engine
                .list_appointments(&filter)
                .await
                .map(|a| Reply::ok(200, &a))
        }
        Request::Doctors => Ok(Reply::ok(200, &engine.doctors())),
        Request::Doctor { id } => engine.doctor(id).map(|d| Reply::ok(200, &d)),
        Request::AppointmentTypes => Ok(Reply::ok(200, &engine.appointment_types())),
    };
    result.unwrap_or_else(|e| Reply::error(&e))
}

/// Decode a request line, run it, and record request metrics.
pub async fn handle_line(engine: &Engine, line: &str) -> Reply {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            debug!("rejected request line: {e}");
            metrics::counter!(crate::observability::REQUESTS_TOTAL, "op" => "invalid", "status" => "422")
                .increment(1);
            return Reply::validation(e.to_string());
        }
    };

    let op = crate::observability::op_label(&request);
    let started = Instant::now();
    let reply = handle_request(engine, request).await;
    metrics::histogram!(crate::observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    metrics::counter!(
        crate::observability::REQUESTS_TOTAL,
        "op" => op,
        "status" => reply.status.to_string()
    )
    .increment(1);
    reply
}

/// Serve one client until it disconnects.
pub async fn process_connection<S>(stream: S, engine: Arc<Engine>) -> Result<(), BoxError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(frame) = framed.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                // The codec stream ends after an error, so reply and hang up.
                warn!("request line exceeds {MAX_LINE_LEN} bytes, closing connection");
                let reply = Reply::validation("request line too long");
                framed.send(serde_json::to_string(&reply)?).await?;
                break;
            }
            Err(LinesCodecError::Io(e)) => return Err(e.into()),
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_line(&engine, &line).await;
        framed.send(serde_json::to_string(&reply)?).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::engine::{BookingLedger, EngineSettings};
    use chrono::{Datelike, Duration, Local, Weekday};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn engine() -> Engine {
        Engine::with_catalog(
            Arc::new(StaticCatalog::builtin()),
            Arc::new(BookingLedger::new()),
            EngineSettings::default(),
        )
        .unwrap()
    }

    /// A future Sunday at `hh:mm` in `YYYY-MM-DD HH:MM:SS` form.
    fn next_sunday_at(hh: u32, mm: u32) -> String {
        let date = (Local::now().date_naive() + Duration::days(1))
            .iter_days()
            .find(|d| d.weekday() == Weekday::Sun)
            .unwrap();
        date.and_hms_opt(hh, mm, 0)
            .unwrap()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    #[test]
    fn parses_every_op() {
        let cases = [
            (r#"{"op":"available"}"#, Request::Available { next_number_of_days: None }),
            (
                r#"{"op":"available","next_number_of_days":3}"#,
                Request::Available { next_number_of_days: Some(3) },
            ),
            (r#"{"op":"upcoming","patient_id":4}"#, Request::Upcoming { patient_id: 4 }),
            (r#"{"op":"doctors"}"#, Request::Doctors),
            (r#"{"op":"doctor","id":2}"#, Request::Doctor { id: 2 }),
            (r#"{"op":"appointment_types"}"#, Request::AppointmentTypes),
            (
                r#"{"op":"appointments","doctor_id":1}"#,
                Request::Appointments {
                    doctor_id: Some(1),
                    appointment_type: None,
                },
            ),
        ];
        for (line, expected) in cases {
            let parsed: Request = serde_json::from_str(line).unwrap();
            assert_eq!(parsed, expected, "{line}");
        }
    }

    #[test]
    fn book_accepts_space_and_t_separators() {
        for raw in ["2025-04-06 09:00:00", "2025-04-06T09:00:00", "2025-04-06 09:00"] {
            let line = format!(
                r#"{{"op":"book","patient_id":1,"doctor_id":1,"appointment_type":"new_patient","start_time":"{raw}"}}"#
            );
            let Request::Book { start_time, .. } = serde_json::from_str::<Request>(&line).unwrap() else {
                panic!("expected book");
            };
            assert_eq!(start_time.to_string(), "2025-04-06 09:00:00");
        }
    }

    #[test]
    fn cancel_scope_prefers_patient() {
        assert_eq!(cancel_scope(Some(1), Some(2)), CancelScope::Patient(1));
        assert_eq!(cancel_scope(None, Some(2)), CancelScope::Doctor(2));
        assert_eq!(cancel_scope(None, None), CancelScope::Any);
    }

    #[tokio::test]
    async fn malformed_line_is_validation_error() {
        let engine = engine();
        for line in [
            "not json",
            r#"{"op":"teleport"}"#,
            r#"{"op":"book","patient_id":1}"#,
            r#"{"op":"book","patient_id":1,"doctor_id":1,"appointment_type":"follow_up","start_time":"tomorrow"}"#,
        ] {
            let reply = handle_line(&engine, line).await;
            assert_eq!(reply.status, 422, "{line}");
            assert_eq!(reply.body["message"], "Validation failed");
        }
    }

    #[tokio::test]
    async fn far_future_start_is_rejected() {
        let engine = engine();
        let line = r#"{"op":"book","patient_id":1,"doctor_id":1,"appointment_type":"new_patient","start_time":"+262142-12-31 23:50:00"}"#;
        let reply = handle_line(&engine, line).await;
        assert_eq!(reply.status, 422);
        assert!(reply.body["error"].as_str().unwrap().contains("out of range"));

        // The connection's engine is still usable afterwards.
        let doctors = handle_line(&engine, r#"{"op":"doctors"}"#).await;
        assert_eq!(doctors.status, 200);
    }

    #[tokio::test]
    async fn book_then_cancel_statuses() {
        let engine = engine();
        let line = format!(
            r#"{{"op":"book","patient_id":5,"doctor_id":1,"appointment_type":"follow_up","start_time":"{}"}}"#,
            next_sunday_at(9, 0)
        );
        let booked = handle_line(&engine, &line).await;
        assert_eq!(booked.status, 201);
        assert_eq!(booked.body["doctor_id"], 1);
        let id = booked.body["id"].as_str().unwrap().to_string();

        let again = handle_line(&engine, &line).await;
        assert_eq!(again.status, 400);
        assert!(again.body["error"].as_str().unwrap().contains("overlaps"));

        let wrong_patient = format!(r#"{{"op":"cancel","appointment_id":"{id}","patient_id":6}}"#);
        assert_eq!(handle_line(&engine, &wrong_patient).await.status, 404);

        let cancel = format!(r#"{{"op":"cancel","appointment_id":"{id}","patient_id":5}}"#);
        let reply = handle_line(&engine, &cancel).await;
        assert_eq!(reply, Reply::no_content());
    }

    #[tokio::test]
    async fn error_statuses() {
        let engine = engine();
        let unknown_type = format!(
            r#"{{"op":"book","patient_id":5,"doctor_id":1,"appointment_type":"surgery","start_time":"{}"}}"#,
            next_sunday_at(9, 0)
        );
        assert_eq!(handle_line(&engine, &unknown_type).await.status, 422);

        let out_of_hours = format!(
            r#"{{"op":"book","patient_id":5,"doctor_id":1,"appointment_type":"follow_up","start_time":"{}"}}"#,
            next_sunday_at(7, 0)
        );
        assert_eq!(handle_line(&engine, &out_of_hours).await.status, 400);

        let missing = handle_line(&engine, r#"{"op":"doctor","id":99}"#).await;
        assert_eq!(missing.status, 400);
        assert!(missing.body["error"].is_string());

        let too_many_days = handle_line(&engine, r#"{"op":"available","next_number_of_days":15}"#).await;
        assert_eq!(too_many_days.status, 422);
    }

    #[tokio::test]
    async fn available_uses_default_days() {
        let engine = engine();
        let reply = handle_line(&engine, r#"{"op":"available"}"#).await;
        assert_eq!(reply.status, 200);
        let body = reply.body.as_object().unwrap();
        assert_eq!(body.len(), 3);
        // Every doctor works at least one day in any 7 day span.
        let rows = body["follow_up"].as_array().unwrap();
        let mut doctors: Vec<u64> = rows.iter().map(|r| r["doctor_id"].as_u64().unwrap()).collect();
        doctors.sort();
        doctors.dedup();
        assert_eq!(doctors, vec![1, 2, 3, 4]);
        assert!(rows[0]["available_start_time"].is_array());
        assert!(rows[0]["doctor"].is_string());
    }

    #[tokio::test]
    async fn connection_answers_line_by_line() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let engine = Arc::new(engine());
        let serve = tokio::spawn(process_connection(server, engine));

        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();

        write.write_all(b"{\"op\":\"doctors\"}\n\n{\"op\":\"doctor\",\"id\":3}\n").await.unwrap();
        let first: Reply = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first.status, 200);
        assert_eq!(first.body.as_array().unwrap().len(), 4);

        let second: Reply = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second.body["name"], "Ron Weasley");

        drop(write);
        drop(lines);
        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn oversized_line_rejected_and_closed() {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let engine = Arc::new(engine());
        let serve = tokio::spawn(process_connection(server, engine));

        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();

        write.write_all(b"{\"op\":\"appointment_types\"}\n").await.unwrap();
        let first: Reply = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first.status, 200);

        let mut huge = vec![b'x'; MAX_LINE_LEN + 10];
        huge.push(b'\n');
        write.write_all(&huge).await.unwrap();

        let rejected: Reply = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(rejected.status, 422);
        serve.await.unwrap().unwrap();
        assert!(lines.next_line().await.unwrap().is_none());
    }
}
