// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Windowed export jobs and the HTTP surface that triggers them.
//!
//! Each `GET /` runs one [`ExportJob`] end to end: load the query template,
//! bind it to the current time window, read the rows, render them and hand
//! the file to the delivery pipeline.

mod job;
mod server;
mod template;

pub use job::{ExportError, ExportJob, ExportReport};
pub use server::ExportServer;
pub use template::{QueryTemplate, TemplateError};
