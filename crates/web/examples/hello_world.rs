use std::io::Write;

use slim_http::server::Server;
use slim_web::{OptionsModule, RouteModule, WebSocketModule};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let routes = RouteModule::builder()
        .get("/", |request, _| {
            request.response_mut().return_ok_text("hello world");
            Ok(())
        })
        .get("/hello/{name}", |request, route| {
            let name = route.param("name").unwrap_or("stranger");
            request.response_mut().return_ok_text(format!("hello {name}"));
            Ok(())
        })
        .post("/echo", |request, route| {
            let form = request.read_form(route.content())?;
            request.response_mut().return_ok_json(&form)?;
            Ok(())
        })
        .build()
        .expect("route table is valid");

    let websocket = WebSocketModule::new(|mut upgraded| {
        info!(peer = %upgraded.peer, path = %upgraded.path, "websocket opened");
        // a real application would frame messages here
        if let Err(e) = upgraded.stream.flush() {
            error!(cause = %e, "websocket stream failed");
        }
    });

    let mut server = Server::builder()
        .address("127.0.0.1:3000")
        .allow_all_origins(true)
        .handler(OptionsModule::allow_all())
        .handler(websocket)
        .handler(routes)
        .build()
        .expect("server should bind");

    info!(address = %server.local_addr(), "listening");
    if let Err(e) = server.run() {
        error!(cause = %e, "server stopped");
    }
}
