//! Command runners behind the `trailscout` binary.
//!
//! Each runner builds the service from config, does one thing, and prints
//! a human-readable report (or JSON with `--json`). Commands that start a
//! fetch wait for it in-process, since the CLI exits when they return.

use anyhow::Result;

use trailscout_core::models::TrailResult;

use crate::app::build_service;
use crate::config::Config;
use crate::coordinator::JobSnapshot;
use crate::search::{ScrapeStatus, SearchRequest, SearchResponse, SearchService};

fn print_trails(trails: &[TrailResult]) {
    if trails.is_empty() {
        println!("No results.");
        return;
    }
    for (i, trail) in trails.iter().enumerate() {
        let score = trail
            .similarity_score
            .map(|s| format!("[{:.2}] ", s))
            .unwrap_or_default();
        println!("{}. {}{}", i + 1, score, trail.name);
        if let Some(miles) = trail.distance_from_query_center {
            println!("    distance: {:.1} mi", miles);
        }
        println!(
            "    location: {:.4},{:.4}",
            trail.location.latitude, trail.location.longitude
        );
        if !trail.tags.is_empty() {
            println!("    tags: {}", trail.tags.join(", "));
        }
        if let Some(ref url) = trail.url {
            println!("    url: {}", url);
        }
        if !trail.snippet.is_empty() {
            println!("    excerpt: \"{}\"", trail.snippet.replace('\n', " ").trim());
        }
        println!("    id: {}", trail.id);
        println!();
    }
}

fn print_job(job: &JobSnapshot) {
    println!("  written: {}", job.written);
    println!("  skipped: {}", job.skipped);
    match &job.error {
        None => println!("ok"),
        Some(err) => println!("failed: {}", err),
    }
}

async fn wait_for_fetch(service: &SearchService, response: &SearchResponse) -> Option<JobSnapshot> {
    let key = response.region_key.as_ref()?;
    if !response.triggered_scrape {
        return None;
    }
    let snapshot = service.coordinator().status(key).await;
    eprintln!(
        "fetching trails for {} ...",
        snapshot.job.as_ref().map(|j| j.label.as_str()).unwrap_or(key.as_str())
    );
    service.coordinator().wait_idle().await;
    service.coordinator().status(key).await.job
}

/// `trailscout search`: search, and on a fetch wait for it and search again.
pub async fn run_search(config: &Config, request: SearchRequest, json: bool) -> Result<()> {
    let service = build_service(config).await?;
    let retry = request.clone().rescrape(false);
    let has_query = !request.query.trim().is_empty();

    let mut response = service.search(request).await?;
    if let Some(job) = wait_for_fetch(&service, &response).await {
        if !json {
            print_job(&job);
            println!();
        }
        if has_query {
            response = service.search(retry).await?;
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    if let Some(ref message) = response.message {
        println!("{}", message);
        println!();
    }
    print_trails(&response.trails);
    Ok(())
}

/// `trailscout scrape`: fetch a region and wait for it to finish.
pub async fn run_scrape(
    config: &Config,
    region: &str,
    radius_miles: Option<f64>,
    rescrape: bool,
) -> Result<()> {
    let service = build_service(config).await?;
    let response = service.scrape_region(region, radius_miles, rescrape).await?;
    println!("scrape {} ({})", region, response.region_key);

    if response.status == ScrapeStatus::AlreadyDone {
        println!("  {}", response.message);
        return Ok(());
    }

    service.coordinator().wait_idle().await;
    let snapshot = service.coordinator().status(&response.region_key).await;
    match snapshot.job {
        Some(ref job) => print_job(job),
        None => println!("  no job recorded"),
    }
    println!("  stored trails: {}", service.get_trail_count().await?);
    Ok(())
}

pub async fn run_list(config: &Config, json: bool) -> Result<()> {
    let service = build_service(config).await?;
    let trails = service.list_stored_trails().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&trails)?);
    } else {
        print_trails(&trails);
    }
    Ok(())
}

pub async fn run_count(config: &Config) -> Result<()> {
    let service = build_service(config).await?;
    println!("{}", service.get_trail_count().await?);
    Ok(())
}
