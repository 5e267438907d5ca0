//! In-process fake HTTP services for client tests.

use actix_web::{web, App, HttpServer};

/// Start an actix-web server on an ephemeral localhost port and return its
/// base URL. Must be called from inside an actix runtime.
pub(crate) fn spawn_fake<F>(configure: F) -> String
where
    F: Fn(&mut web::ServiceConfig) + Send + Clone + 'static,
{
    let server = HttpServer::new(move || App::new().configure(configure.clone()))
        .workers(1)
        .disable_signals()
        .bind(("127.0.0.1", 0))
        .expect("bind fake server");
    let addr = server.addrs()[0];
    actix_rt::spawn(server.run());
    format!("http://{}", addr)
}
