use crate::engine::{Resolved, ResolverEngine, Source};

use hickory_proto::op::{MessageType, OpCode, Query, ResponseCode};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use std::iter;
use std::net::SocketAddr;
use std::time::Duration;

/// Pega los dos listeners (UDP y TCP sobre el mismo endpoint) al engine.
/// Ambos transportes comparten exactamente el mismo camino de resolución;
/// lo único que cambia es la etiqueta de transporte en la clave de cache.
#[derive(Clone)]
pub struct DnsHandler {
    engine: ResolverEngine,
}

impl DnsHandler {
    pub fn new(engine: ResolverEngine) -> Self {
        Self { engine }
    }

    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        use hickory_server::ServerFuture;
        use tokio::net::{TcpListener, UdpSocket};

        let udp_socket = UdpSocket::bind(addr).await?;
        let tcp_listener = TcpListener::bind(addr).await?;

        let mut server = ServerFuture::new(self);
        server.register_socket(udp_socket);
        server.register_listener(tcp_listener, Duration::from_secs(10));

        server.block_until_done().await?;
        Ok(())
    }

    fn set_common_flags(
        req: &Request,
        header: &mut hickory_proto::op::Header,
        rcode: ResponseCode,
    ) {
        header.set_message_type(MessageType::Response);
        header.set_op_code(OpCode::Query);
        header.set_response_code(rcode);

        // RD lo define el cliente; lo preservamos
        header.set_recursion_desired(req.recursion_desired());

        // RA: somos un forwarder, anunciamos recursión
        header.set_recursion_available(true);

        // AD/AA: no validamos DNSSEC ni somos autoritativos
        header.set_authentic_data(false);
        header.set_authoritative(false);
    }
}

fn rcode_label(rcode: ResponseCode) -> &'static str {
    match rcode {
        ResponseCode::NoError => "NOERROR",
        ResponseCode::NXDomain => "NXDOMAIN",
        ResponseCode::ServFail => "SERVFAIL",
        ResponseCode::FormErr => "FORMERR",
        ResponseCode::NotImp => "NOTIMP",
        ResponseCode::Refused => "REFUSED",
        _ => "OTHER",
    }
}

fn log_query(question: &Query, source: &Source, rcode: ResponseCode) {
    let status = rcode_label(rcode);
    if rcode == ResponseCode::NoError {
        tracing::info!(
            action = "resolve",
            domain = %question.name(),
            query_type = %question.query_type(),
            upstream = %source,
            status,
            "consulta respondida"
        );
    } else {
        tracing::warn!(
            action = "resolve",
            domain = %question.name(),
            query_type = %question.query_type(),
            upstream = %source,
            status,
            "consulta respondida"
        );
    }
}

#[async_trait::async_trait]
impl RequestHandler for DnsHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        req: &Request,
        mut response: R,
    ) -> ResponseInfo {
        let question = match req.queries().first() {
            Some(q) => q.original().clone(),
            None => {
                // mensaje sin pregunta: NXDOMAIN inmediato, sin tocar la red
                tracing::warn!(action = "reject", status = "NXDOMAIN", "consulta sin pregunta");
                let msg = MessageResponseBuilder::from_message_request(req)
                    .error_msg(req.header(), ResponseCode::NXDomain);
                return response
                    .send_response(msg)
                    .await
                    .unwrap_or_else(|_| ResponseInfo::from(*req.header()));
            }
        };

        let Resolved { message, source } = self
            .engine
            .resolve(&question, req.recursion_desired(), req.protocol())
            .await;

        log_query(&question, &source, message.response_code());

        let mut header = *req.header();
        Self::set_common_flags(req, &mut header, message.response_code());

        let msg = MessageResponseBuilder::from_message_request(req).build(
            header,
            message.answers().iter(),
            message.name_servers().iter(),
            iter::empty(),
            message.additionals().iter(),
        );

        response
            .send_response(msg)
            .await
            .unwrap_or_else(|_| ResponseInfo::from(*req.header()))
    }
}
