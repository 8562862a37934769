use anyhow::{bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use humansize::{format_size, DECIMAL};
use indicatif::{ProgressBar, ProgressStyle};
use mirror_core::path_utils::MirrorPath;
use mirror_pipeline::{
    analyze, MirrorEngine, MirrorOptions, Phase, ProgressEvent, ProgressSink, RunOutcome,
    RunReport, SyncPlan, SyncStats,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Dry run: analyze both trees and print what a reconciliation would do.
pub async fn cmd_plan(
    source: Utf8PathBuf,
    dest: Utf8PathBuf,
    options: MirrorOptions,
) -> Result<SyncPlan> {
    println!(":: Analyzing...");
    println!("   Source: {}", source);
    println!("   Dest:   {}", dest);

    if !source.is_dir() {
        bail!("Source directory does not exist: {}", source);
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));

    let sink: Arc<dyn ProgressSink> = {
        let pb = pb.clone();
        Arc::new(mirror_pipeline::FnSink(move |ev: ProgressEvent| {
            pb.set_message(describe(&ev));
        }))
    };

    let plan = analyze(
        &source,
        &dest,
        options.policy(),
        &CancellationToken::new(),
        Some(sink),
    )
    .await
    .context("Analysis failed")?;
    pb.finish_and_clear();

    println!("\n:: Plan");
    println!("   To copy:        {}", plan.to_copy.len());
    println!("   To delete:      {}", plan.to_delete.len());
    println!("   Dirs to create: {}", plan.dirs_to_create.len());
    println!("   Stale dirs:     {}", plan.stale_dirs.len());

    if plan.is_empty() {
        println!("   Status:         Already synchronized");
        return Ok(plan);
    }

    for path in &plan.to_copy {
        println!("   + {}", relative(&plan.source_root, path));
    }
    for path in &plan.to_delete {
        println!("   - {}", relative(&plan.dest_root, path));
    }
    for path in &plan.stale_dirs {
        println!("   - {}/", relative(&plan.dest_root, path));
    }

    Ok(plan)
}

/// Reconcile, then (unless `once`) keep watching until Ctrl-C.
pub async fn cmd_run(
    source: Utf8PathBuf,
    dest: Utf8PathBuf,
    options: MirrorOptions,
    once: bool,
) -> Result<RunReport> {
    println!(":: Mirroring...");
    println!("   Source: {}", source);
    println!("   Dest:   {}", dest);

    let engine = Arc::new(MirrorEngine::new(options));
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();

    let engine_handle = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let sink: Arc<dyn ProgressSink> = Arc::new(tx);
            let cancel = CancellationToken::new();
            if once {
                engine.reconcile_once(&source, &dest, sink, cancel).await
            } else {
                engine.start(&source, &dest, sink, cancel).await
            }
        })
    };

    let ctrl_c = {
        let engine = engine.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                engine.stop().await;
            }
        })
    };

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let mut watching = false;
    while let Some(ev) = rx.recv().await {
        if ev.phase == Phase::Monitoring && ev.status == "Watching" && !watching {
            watching = true;
            pb.finish_and_clear();
            println!(":: Watching for changes (Ctrl-C to stop)");
            continue;
        }
        if watching {
            print_live(&ev);
        } else {
            render(&pb, &ev);
        }
    }

    ctrl_c.abort();
    let report = engine_handle.await?.context("Mirror session failed")?;
    pb.finish_and_clear();

    print_summary(&report);
    Ok(report)
}

fn render(pb: &ProgressBar, ev: &ProgressEvent) {
    if ev.total_count > 0 {
        pb.set_length(ev.total_count);
        pb.set_position(ev.processed_count);
    }
    pb.set_message(describe(ev));
    if let Some(message) = problem(ev) {
        pb.println(format!("   ! {}", message));
    }
}

fn print_live(ev: &ProgressEvent) {
    if let Some(message) = problem(ev) {
        println!("   ! {}", message);
        return;
    }
    match (ev.status.as_str(), &ev.detail) {
        ("Copied" | "Deleted" | "Renamed", Some(path)) => println!("   {} {}", ev.status, path),
        ("Stopped", _) | ("Faulted", _) => println!(":: {}", ev.status),
        _ => {}
    }
}

fn describe(ev: &ProgressEvent) -> String {
    match &ev.detail {
        Some(detail) => format!("{} {}", ev.status, detail),
        None => ev.status.clone(),
    }
}

fn problem(ev: &ProgressEvent) -> Option<&str> {
    match ev.status.as_str() {
        "Warning" | "Locked" | "Failed" => ev.message.as_deref(),
        _ => None,
    }
}

fn print_summary(report: &RunReport) {
    let mut total = SyncStats::default();
    total.merge(&report.initial);
    total.merge(&report.live);

    let status = match report.outcome {
        RunOutcome::Completed => "Completed",
        RunOutcome::Stopped => "Stopped",
        RunOutcome::AlreadyRunning => "Already running",
    };

    println!("\n:: Mirror Result");
    println!("   Status:        {}", status);
    println!(
        "   Copied:        {} ({})",
        total.files_copied,
        format_size(total.bytes_copied, DECIMAL)
    );
    println!("   Deleted:       {}", total.files_deleted);
    println!("   Renamed:       {}", total.files_renamed);
    println!(
        "   Directories:   {} created, {} removed",
        total.dirs_created, total.dirs_removed
    );
    if total.failures > 0 {
        println!("   Failures:      {}", total.failures);
    }
}

fn relative(root: &Utf8Path, path: &Utf8Path) -> String {
    MirrorPath::relative(root, path).unwrap_or_else(|| path.to_string())
}
