// Lead Outreach Pipeline - API Core
//
// This crate turns company domains into review-ready outreach drafts through
// three queued stages: scrape → analyze → draft. Each stage is a job on a
// durable Postgres queue; a lead's status records how far it got.
//
// Stage logic lives in domains/leads; queue and capability plumbing in kernel/.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
