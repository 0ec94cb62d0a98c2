//! Application lifecycle commands

use std::io::Write;

use clap::Args;
use serde_json::json;

use astro_cluster::AppStatus;
use astro_lifecycle::{AppId, CreateApplication, LifecycleController, OwnerId};

use super::write_json;
use crate::Result;

/// Arguments for `create`
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Application name (DNS-1123 label)
    pub name: String,

    /// Container image reference
    #[arg(long)]
    pub image: String,

    /// Desired replica count
    #[arg(long, default_value_t = 1)]
    pub replicas: i32,

    /// Port to expose inside the cluster
    #[arg(long)]
    pub port: Option<u16>,

    /// Extra workload label, repeatable (`key=value`)
    #[arg(long = "label", value_parser = parse_label)]
    pub labels: Vec<(String, String)>,
}

/// Arguments for commands addressing one application
#[derive(Args, Debug)]
pub struct IdArgs {
    /// Application id
    pub id: u64,
}

/// Arguments for `logs`
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Application id
    pub id: u64,

    /// Number of tail lines; 0 uses the configured default
    #[arg(long, default_value_t = 0)]
    pub lines: i64,
}

fn parse_label(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid label '{s}': expected key=value"))?;
    if key.is_empty() {
        return Err(format!("invalid label '{s}': empty key"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub async fn create<W: Write>(
    controller: &LifecycleController,
    owner: OwnerId,
    args: CreateArgs,
    out: &mut W,
) -> Result<()> {
    let mut request = CreateApplication::new(args.name, args.image, args.replicas);
    request.port = args.port;
    request.labels = args.labels.into_iter().collect();

    let app = controller.create(owner, request).await?;
    write_json(out, &app)
}

pub async fn start<W: Write>(
    controller: &LifecycleController,
    owner: OwnerId,
    args: IdArgs,
    out: &mut W,
) -> Result<()> {
    controller.start(AppId(args.id), owner).await?;
    write_json(out, &json!({ "id": args.id, "status": AppStatus::Starting }))
}

pub async fn stop<W: Write>(
    controller: &LifecycleController,
    owner: OwnerId,
    args: IdArgs,
    out: &mut W,
) -> Result<()> {
    controller.stop(AppId(args.id), owner).await?;
    write_json(
        out,
        &json!({ "id": args.id, "status": AppStatus::Stopped, "replicas": 0 }),
    )
}

pub async fn restart<W: Write>(
    controller: &LifecycleController,
    owner: OwnerId,
    args: IdArgs,
    out: &mut W,
) -> Result<()> {
    controller.restart(AppId(args.id), owner).await?;
    write_json(out, &json!({ "id": args.id, "status": AppStatus::Restarting }))
}

pub async fn delete<W: Write>(
    controller: &LifecycleController,
    owner: OwnerId,
    args: IdArgs,
    out: &mut W,
) -> Result<()> {
    controller.delete(AppId(args.id), owner).await?;
    write_json(out, &json!({ "id": args.id, "deleted": true }))
}

pub async fn get<W: Write>(
    controller: &LifecycleController,
    owner: OwnerId,
    args: IdArgs,
    out: &mut W,
) -> Result<()> {
    let app = controller.get(AppId(args.id), owner).await?;
    write_json(out, &app)
}

pub async fn list<W: Write>(
    controller: &LifecycleController,
    owner: OwnerId,
    out: &mut W,
) -> Result<()> {
    let apps = controller.list(owner).await?;
    write_json(out, &apps)
}

pub async fn logs<W: Write>(
    controller: &LifecycleController,
    owner: OwnerId,
    args: LogsArgs,
    out: &mut W,
) -> Result<()> {
    let text = controller.get_logs(AppId(args.id), owner, args.lines).await?;
    out.write_all(text.as_bytes())?;
    Ok(())
}
