use std::collections::BTreeMap;

use clap::Parser;
use serde::Serialize;
use vidresolve::extractors::{self, ExtractRequest, ExtractedVideo, Track};
use vidresolve::preference::sort_videos;

pub(crate) mod cli;
pub(crate) mod logger;

#[derive(Serialize)]
struct VideoOutput<'a> {
    label: &'a str,
    url: &'a str,
    headers: BTreeMap<&'a str, &'a str>,
    subtitles: &'a [Track],
    audio_tracks: &'a [Track],
}

impl<'a> From<&'a ExtractedVideo> for VideoOutput<'a> {
    fn from(video: &'a ExtractedVideo) -> Self {
        VideoOutput {
            label: &video.label,
            url: &video.url,
            headers: video
                .headers
                .iter()
                .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value)))
                .collect(),
            subtitles: &video.subtitles,
            audio_tracks: &video.audio_tracks,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Parse arguments
    let args = cli::Args::parse();

    // Set up logger
    if let Err(err) = logger::init(args.debug) {
        eprintln!("Failed to set up logger: {err}");
    }

    // Fail fast if extractor name is invalid
    if let Some(extractor_name) = args.extractor.as_deref() {
        if !extractors::exists_extractor_with_name(extractor_name) {
            log::error!(
                "Failed to find an extractor named: {} (available: {})",
                extractor_name,
                extractors::extractor_names().join(", ")
            );
            std::process::exit(1);
        }
    }

    let requests = args
        .urls
        .iter()
        .map(|url| {
            ExtractRequest::new(url.as_str())
                .referer(args.referer.as_deref())
                .user_agent(args.user_agent.as_deref())
                .prefix(args.prefix.clone())
        })
        .collect::<Vec<_>>();

    let results = futures_util::future::join_all(
        requests
            .iter()
            .map(|request| resolve_request(args.extractor.as_deref(), request)),
    )
    .await;

    let mut videos = results.into_iter().flatten().collect::<Vec<_>>();
    sort_videos(&mut videos, &args.get_quality_preference());

    if videos.is_empty() {
        log::error!("No videos found");
        std::process::exit(1);
    }

    for video in &videos {
        if args.json {
            match serde_json::to_string(&VideoOutput::from(video)) {
                Ok(line) => println!("{line}"),
                Err(err) => log::error!("Failed to serialize video {}: {}", video.url, err),
            }
        } else {
            print_video(video);
        }
    }
}

async fn resolve_request(extractor: Option<&str>, request: &ExtractRequest) -> Vec<ExtractedVideo> {
    let result = match extractor {
        Some(extractor_name) => extractors::resolve_with_extractor(extractor_name, request).await,
        None => {
            if let Some(extractor_name) = extractors::find_extractor(&request.url).await {
                log::debug!("Using the {} extractor for the url: {}", extractor_name, request.url);
            }
            extractors::resolve(request).await
        }
    };

    match result {
        Some(videos) => {
            if videos.is_empty() {
                log::warn!("No videos found for the url: {}", request.url);
            }
            videos
        }
        None => {
            match extractor.and_then(extractors::normalized_name) {
                Some(extractor_name) => log::error!(
                    "The specified extractor \"{}\" does not support the url: {}",
                    extractor_name,
                    request.url
                ),
                None => log::error!("Failed to find an extractor for the url: {}", request.url),
            }
            Vec::new()
        }
    }
}

fn print_video(video: &ExtractedVideo) {
    println!("{}: {}", video.label, video.url);

    for (name, value) in &video.headers {
        println!("    {}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    for subtitle in &video.subtitles {
        println!("    subtitle {}: {}", subtitle.label, subtitle.url);
    }
    for audio in &video.audio_tracks {
        println!("    audio {}: {}", audio.label, audio.url);
    }
}
