//! Local OSCQuery advertisement server
//!
//! Serves our host-info and parameter documents at the root URL so the game
//! client can find the OSC receive port it should send avatar parameters
//! to. Bound to an ephemeral port; the assigned port is fed into the mDNS
//! advertisement.

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use log::info;

use crate::error::Result;

use super::json::{HostInfo, OscQueryNode};

struct ServerState {
    service_name: String,
    osc_port: u16,
}

/// Handle to the running query server.
pub struct QueryServer {
    pub port: u16,
    handle: actix_web::dev::ServerHandle,
}

impl QueryServer {
    /// Bind an ephemeral port and start serving. `osc_port` is the local
    /// UDP port advertised in the host-info document.
    pub async fn spawn(service_name: String, osc_port: u16) -> Result<Self> {
        let state = web::Data::new(ServerState {
            service_name,
            osc_port,
        });
        let server = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .route("/", web::get().to(handle_root))
        })
        .workers(1)
        .bind(("0.0.0.0", 0))?;

        let port = server
            .addrs()
            .first()
            .map(|a| a.port())
            .ok_or_else(|| crate::error::Error::Other("query server has no bound address".into()))?;
        let server = server.run();
        let handle = server.handle();
        tokio::spawn(server);
        info!("OSCQuery server listening on port {port}");
        Ok(Self { port, handle })
    }

    pub async fn stop(&self) {
        self.handle.stop(true).await;
    }
}

async fn handle_root(req: HttpRequest, state: web::Data<ServerState>) -> HttpResponse {
    if req.query_string().contains("HOST_INFO") {
        let info = HostInfo::new(state.service_name.clone(), "127.0.0.1", state.osc_port);
        return HttpResponse::Ok().json(info);
    }
    HttpResponse::Ok().json(parameter_tree())
}

/// Advertised parameter tree: we accept writes anywhere under `/avatar`.
fn parameter_tree() -> OscQueryNode {
    let mut avatar = OscQueryNode::container("/avatar");
    avatar.access = 2;
    OscQueryNode::container("/").with_child("avatar", avatar)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_both_documents() {
        let server = QueryServer::spawn("ShockOsc-Test".to_string(), 9001)
            .await
            .unwrap();

        let client = reqwest::Client::new();
        let info: HostInfo = client
            .get(format!("http://127.0.0.1:{}/?HOST_INFO", server.port))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(info.osc_port, 9001);
        assert_eq!(info.name, "ShockOsc-Test");

        let tree: OscQueryNode = client
            .get(format!("http://127.0.0.1:{}/", server.port))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(tree.contents.unwrap().contains_key("avatar"));

        server.stop().await;
    }
}
