// Copyright (c) James Kassemi, SC, US. All rights reserved.
//! Export trigger endpoint. hyper v1.+
use crate::job::ExportJob;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, info};
use std::convert::Infallible;
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct ExportServer {
    job: Arc<ExportJob>,
}

impl ExportServer {
    pub fn new(job: Arc<ExportJob>) -> Self {
        Self { job }
    }

    /// `GET /` runs one export; 200 with an empty body when the file reached
    /// the transfer sink, 500 with the error text otherwise.
    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible> {
        if req.uri().path() != "/" {
            return Ok(text_response(StatusCode::NOT_FOUND, "not found"));
        }
        if req.method() != Method::GET {
            let mut resp = text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
            resp.headers_mut().insert(ALLOW, HeaderValue::from_static("GET"));
            return Ok(resp);
        }

        match self.job.run().await {
            Ok(report) => {
                info!(
                    "export {} done: {} rows, {} bytes, window {}",
                    report.file_name, report.rows, report.bytes, report.window
                );
                Ok(Response::new(Full::new(Bytes::new())))
            }
            Err(err) => {
                error!("export failed: {err}");
                Ok(text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &err.to_string(),
                ))
            }
        }
    }

    pub async fn serve(
        self: &Arc<Self>,
        listener: TcpListener,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        loop {
            let (socket, peer) = listener.accept().await?;
            debug!("accepted connection from {peer}");
            let io = TokioIo::new(socket);
            let server = self.clone();
            let service = service_fn(move |req| {
                let server = server.clone();
                async move { server.handle(req).await }
            });
            tokio::spawn(async move {
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("error serving connection: {err:?}");
                }
            });
        }
    }
}

fn text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from(body.to_string())));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}
