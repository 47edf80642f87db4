use actix_web::dev::Server;
use actix_web::{App, HttpResponse, HttpServer, Responder, get};
use serde::Serialize;

use crate::metrics::{METRICS, MetricsSnapshot};

#[derive(Serialize)]
struct ProbeResp<'a> {
    status: &'a str,
}

/// Ready only once startup recovery has finished for every node.
#[get("/k8s/readyz")]
async fn readyz() -> impl Responder {
    if METRICS.is_ready() {
        HttpResponse::Ok().json(ProbeResp { status: "ok" })
    } else {
        HttpResponse::ServiceUnavailable().json(ProbeResp { status: "recovering" })
    }
}

#[get("/k8s/livez")]
async fn livez() -> impl Responder {
    HttpResponse::Ok().json(ProbeResp { status: "ok" })
}

#[get("/k8s/metrics")]
async fn metrics() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(render(&METRICS.snapshot()))
}

pub(crate) fn render(m: &MetricsSnapshot) -> String {
    format!(
        concat!(
            "# HELP lyre_uptime_seconds Seconds since process start\n",
            "# TYPE lyre_uptime_seconds counter\n",
            "lyre_uptime_seconds {}\n",
            "# HELP lyre_ready 1 once startup recovery is complete\n",
            "# TYPE lyre_ready gauge\n",
            "lyre_ready {}\n",
            "# HELP lyre_sessions_active Sessions held in memory\n",
            "# TYPE lyre_sessions_active gauge\n",
            "lyre_sessions_active {}\n",
            "# HELP lyre_sessions_saved_total Session snapshots written\n",
            "# TYPE lyre_sessions_saved_total counter\n",
            "lyre_sessions_saved_total {}\n",
            "# HELP lyre_session_save_failures_total Session snapshot writes that failed\n",
            "# TYPE lyre_session_save_failures_total counter\n",
            "lyre_session_save_failures_total {}\n",
            "# HELP lyre_storage_read_failures_total Queue reads that failed open\n",
            "# TYPE lyre_storage_read_failures_total counter\n",
            "lyre_storage_read_failures_total {}\n",
            "# HELP lyre_storage_write_failures_total Queue writes that were dropped\n",
            "# TYPE lyre_storage_write_failures_total counter\n",
            "lyre_storage_write_failures_total {}\n",
            "# HELP lyre_sessions_recovered_total Sessions restored after a node restart\n",
            "# TYPE lyre_sessions_recovered_total counter\n",
            "lyre_sessions_recovered_total {}\n",
            "# HELP lyre_recovery_failures_total Guilds whose recovery failed\n",
            "# TYPE lyre_recovery_failures_total counter\n",
            "lyre_recovery_failures_total {}\n",
            "# HELP lyre_sessions_swept_total Orphaned records removed by the sweeper\n",
            "# TYPE lyre_sessions_swept_total counter\n",
            "lyre_sessions_swept_total {}\n"
        ),
        m.uptime_secs,
        u8::from(m.ready),
        m.sessions_active,
        m.sessions_saved,
        m.session_save_failures,
        m.storage_read_failures,
        m.storage_write_failures,
        m.sessions_recovered,
        m.recovery_failures,
        m.sessions_swept,
    )
}

/// Binds the probe server. The caller spawns the returned future and stops
/// it through its handle; process signals are left to the caller.
pub fn serve(bind: &str) -> std::io::Result<Server> {
    Ok(HttpServer::new(|| {
        App::new()
            .service(readyz)
            .service(livez)
            .service(metrics)
    })
    .bind(bind)?
    .workers(1)
    .disable_signals()
    .run())
}
