//! Material stage: stock footage for every timeline window.
//!
//! The timeline is estimated from line lengths (voicing runs in parallel),
//! split into windows per search query, and each window is resolved by
//! walking the stock providers in priority order. Windows nobody can fill
//! get the filler asset; only a total outage fails the stage.

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use vgen_models::{ClipSource, MaterialClip, Script, Stage, TimeWindow, VoiceSegment};
use vgen_providers::{MediaCandidate, StockMediaProvider};

use super::keywords::{KeywordExtractor, FALLBACK_QUERY};
use super::with_deadline;
use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::error::MaterialError;
use crate::metrics;
use crate::providers::ProviderSet;
use crate::workspace::TaskWorkspace;

/// Shortest estimated time a line occupies.
const MIN_LINE_MS: u64 = 800;

/// Alternates tried when a download fails, before using the filler.
const MAX_DOWNLOAD_TRIES: usize = 3;

const FILLER_PROVIDER: &str = "filler";

/// One window to fill, before any provider is queried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPlan {
    pub line_index: usize,
    pub slot: u32,
    pub slots: u32,
    pub query: String,
    pub window: TimeWindow,
}

fn line_estimate_ms(text: &str, chars_per_second: f64) -> u64 {
    let chars = text.chars().count() as f64;
    ((chars / chars_per_second) * 1000.0).round().max(MIN_LINE_MS as f64) as u64
}

/// Estimated spoken length of the whole script.
pub fn estimate_timeline_ms(script: &Script, chars_per_second: f64) -> u64 {
    script
        .lines
        .iter()
        .map(|l| line_estimate_ms(&l.text, chars_per_second))
        .sum()
}

/// Split `total_ms` across lines in proportion to their estimated length.
fn line_windows(script: &Script, total_ms: u64, chars_per_second: f64) -> Vec<TimeWindow> {
    let weights: Vec<u64> = script
        .lines
        .iter()
        .map(|l| line_estimate_ms(&l.text, chars_per_second))
        .collect();
    let sum: u64 = weights.iter().sum::<u64>().max(1);

    let mut windows = Vec::with_capacity(weights.len());
    let mut cumulative = 0u64;
    for w in weights {
        let start = total_ms * cumulative / sum;
        cumulative += w;
        let end = total_ms * cumulative / sum;
        windows.push(TimeWindow::new(start, end));
    }
    windows
}

/// Derive queries per line and split each line's window evenly among them.
///
/// Every line gets at least one window; an extractor that finds nothing
/// falls back to a generic query.
pub fn plan_windows(
    script: &Script,
    timeline_ms: u64,
    config: &PipelineConfig,
    extractor: &dyn KeywordExtractor,
) -> Vec<WindowPlan> {
    let mut plans = Vec::new();
    for (line, window) in script
        .lines
        .iter()
        .zip(line_windows(script, timeline_ms, config.chars_per_second))
    {
        let mut queries = extractor.queries(&line.text, config.max_queries_per_line);
        queries.retain(|q| !q.trim().is_empty());
        if queries.is_empty() {
            queries.push(FALLBACK_QUERY.to_string());
        }
        let slots = queries.len().max(1);
        for (slot, (query, sub)) in queries.into_iter().zip(window.split(slots)).enumerate() {
            plans.push(WindowPlan {
                line_index: line.index,
                slot: slot as u32,
                slots: slots as u32,
                query,
                window: sub,
            });
        }
    }
    plans
}

fn fit_tier(duration_ms: Option<u64>, window_ms: u64) -> u8 {
    match duration_ms {
        Some(d) if d >= window_ms && d.saturating_mul(2) <= window_ms.saturating_mul(3) => 0,
        Some(d) if d >= window_ms => 1,
        None => 2,
        Some(_) => 3,
    }
}

/// Order candidates by how well they fit the window: covers it without
/// much waste, then longer, then unknown, then too short (needs looping).
/// Provider order is kept within a tier.
pub fn rank_candidates(candidates: &mut [MediaCandidate], window_ms: u64) {
    candidates.sort_by_key(|c| fit_tier(c.duration_ms, window_ms));
}

#[derive(Debug, Default)]
struct WindowSearch {
    provider: Option<usize>,
    candidates: Vec<MediaCandidate>,
    /// Some provider answered (possibly with nothing)
    reachable: bool,
    errors: Vec<String>,
}

async fn search_window(
    plan: &WindowPlan,
    providers: &[Arc<dyn StockMediaProvider>],
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<WindowSearch, MaterialError> {
    if cancel.is_cancelled() {
        return Err(MaterialError::Cancelled);
    }

    let mut search = WindowSearch::default();
    for (idx, provider) in providers.iter().enumerate() {
        let result = with_deadline(
            provider.name(),
            config.provider_timeout,
            provider.search(&plan.query, config.search_max_results),
        )
        .await;

        match result {
            Ok(mut candidates) if !candidates.is_empty() => {
                rank_candidates(&mut candidates, plan.window.duration_ms());
                search.provider = Some(idx);
                search.candidates = candidates;
                search.reachable = true;
                return Ok(search);
            }
            Ok(_) => {
                search.reachable = true;
                debug!(provider = provider.name(), query = %plan.query, "No results");
            }
            Err(e) => {
                warn!(provider = provider.name(), query = %plan.query, "Search failed: {}", e);
                search.errors.push(format!("{}: {}", provider.name(), e));
            }
        }

        if idx + 1 < providers.len() {
            metrics::record_provider_fallback(Stage::Materializing, provider.name());
        }
    }
    Ok(search)
}

type SourceKey = (usize, String);

/// Preference order per window, avoiding the source picked for the
/// previous window. Unused sources come first, then reused ones, and the
/// previous window's source only if nothing else is left.
fn select_sources(searches: &[WindowSearch]) -> Vec<Vec<usize>> {
    let mut used: HashSet<SourceKey> = HashSet::new();
    let mut previous: Option<SourceKey> = None;
    let mut selections = Vec::with_capacity(searches.len());

    for search in searches {
        let Some(provider) = search.provider else {
            previous = None;
            selections.push(Vec::new());
            continue;
        };

        let key = |i: usize| -> SourceKey { (provider, search.candidates[i].source_id.clone()) };
        let mut order: Vec<usize> = (0..search.candidates.len()).collect();
        order.sort_by_key(|&i| {
            let k = key(i);
            if previous.as_ref() == Some(&k) {
                2
            } else if used.contains(&k) {
                1
            } else {
                0
            }
        });

        if let Some(&chosen) = order.first() {
            let k = key(chosen);
            used.insert(k.clone());
            previous = Some(k);
        }
        selections.push(order);
    }
    selections
}

async fn download(
    provider: &dyn StockMediaProvider,
    candidate: &MediaCandidate,
    workspace: &TaskWorkspace,
    config: &PipelineConfig,
) -> Option<PathBuf> {
    match with_deadline(
        provider.name(),
        config.provider_timeout,
        provider.download(candidate, &workspace.clips_dir()),
    )
    .await
    {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(
                provider = provider.name(),
                source_id = %candidate.source_id,
                "Download failed: {}", e
            );
            None
        }
    }
}

/// Resolve visual material covering `[0, timeline_ms)`.
pub async fn resolve_material(
    script: &Script,
    timeline_ms: u64,
    providers: &ProviderSet,
    extractor: &dyn KeywordExtractor,
    workspace: &TaskWorkspace,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<Vec<MaterialClip>, MaterialError> {
    let stock = providers.stock.as_slice();
    if stock.is_empty() {
        return Err(MaterialError::AllProvidersExhausted {
            message: "no stock providers configured".to_string(),
        });
    }

    let plans = plan_windows(script, timeline_ms, config, extractor);
    let parallel = config.material_parallelism.max(1);

    let mut indexed: Vec<(usize, WindowSearch)> = Vec::with_capacity(plans.len());
    let pending: Vec<_> = plans
        .iter()
        .enumerate()
        .map(|(i, plan)| async move { (i, search_window(plan, stock, config, cancel).await) })
        .collect();
    let mut searches_stream = stream::iter(pending).buffer_unordered(parallel);
    while let Some((i, result)) = searches_stream.next().await {
        indexed.push((i, result?));
    }
    drop(searches_stream);
    indexed.sort_by_key(|(i, _)| *i);
    let searches: Vec<WindowSearch> = indexed.into_iter().map(|(_, s)| s).collect();

    if !searches.is_empty() && searches.iter().all(|s| !s.reachable) {
        let mut errors: Vec<&str> = searches
            .iter()
            .flat_map(|s| s.errors.iter().map(String::as_str))
            .collect();
        errors.sort_unstable();
        errors.dedup();
        return Err(MaterialError::AllProvidersExhausted {
            message: errors.into_iter().take(5).collect::<Vec<_>>().join("; "),
        });
    }

    if cancel.is_cancelled() {
        return Err(MaterialError::Cancelled);
    }
    tokio::fs::create_dir_all(workspace.clips_dir()).await?;

    let selections = select_sources(&searches);

    // First choices are downloaded concurrently, once per distinct source
    let mut downloads: HashMap<SourceKey, Option<PathBuf>> = HashMap::new();
    let mut primaries: Vec<(SourceKey, &MediaCandidate)> = Vec::new();
    for (search, order) in searches.iter().zip(&selections) {
        if let (Some(provider), Some(&first)) = (search.provider, order.first()) {
            let candidate = &search.candidates[first];
            let key = (provider, candidate.source_id.clone());
            if !primaries.iter().any(|(k, _)| *k == key) {
                primaries.push((key, candidate));
            }
        }
    }
    let pending: Vec<_> = primaries
        .into_iter()
        .map(|(key, candidate)| async move {
            let path = download(stock[key.0].as_ref(), candidate, workspace, config).await;
            (key, path)
        })
        .collect();
    let fetched: Vec<(SourceKey, Option<PathBuf>)> =
        stream::iter(pending).buffer_unordered(parallel).collect().await;
    downloads.extend(fetched);

    let mut clips = Vec::with_capacity(plans.len());
    let mut filler_windows = 0usize;
    for ((plan, search), order) in plans.iter().zip(&searches).zip(&selections) {
        let mut resolved = None;
        if let Some(provider) = search.provider {
            for &i in order.iter().take(MAX_DOWNLOAD_TRIES) {
                if cancel.is_cancelled() {
                    return Err(MaterialError::Cancelled);
                }
                let candidate = &search.candidates[i];
                let key = (provider, candidate.source_id.clone());
                let path = match downloads.get(&key) {
                    Some(cached) => cached.clone(),
                    None => {
                        let path =
                            download(stock[provider].as_ref(), candidate, workspace, config).await;
                        downloads.insert(key, path.clone());
                        path
                    }
                };
                if let Some(path) = path {
                    resolved = Some((provider, candidate, path));
                    break;
                }
            }
        }

        let clip = match resolved {
            Some((provider, candidate, path)) => MaterialClip {
                provider: stock[provider].name().to_string(),
                source_id: candidate.source_id.clone(),
                source: ClipSource::File { path },
                query: plan.query.clone(),
                window: plan.window,
                line_index: plan.line_index,
                slot: plan.slot,
                slots: plan.slots,
                source_duration_ms: candidate.duration_ms,
                is_filler: false,
            },
            None => {
                filler_windows += 1;
                MaterialClip {
                    provider: FILLER_PROVIDER.to_string(),
                    source_id: FILLER_PROVIDER.to_string(),
                    source: config.filler.clone(),
                    query: plan.query.clone(),
                    window: plan.window,
                    line_index: plan.line_index,
                    slot: plan.slot,
                    slots: plan.slots,
                    source_duration_ms: None,
                    is_filler: true,
                }
            }
        };
        clips.push(clip);
    }

    metrics::record_filler_windows(filler_windows);
    info!(
        windows = clips.len(),
        filler = filler_windows,
        "Material resolved"
    );
    Ok(clips)
}

/// Move clip windows onto the actual voice timeline.
///
/// Slot `i` of `n` for a line covers `[s + d*i/n, s + d*(i+1)/n)` of that
/// line's segment, so coverage stays gapless.
pub fn retime_clips(clips: &[MaterialClip], segments: &[VoiceSegment]) -> Vec<MaterialClip> {
    let windows: HashMap<usize, TimeWindow> =
        segments.iter().map(|s| (s.line_index, s.window())).collect();

    clips
        .iter()
        .map(|clip| {
            let mut clip = clip.clone();
            if let Some(window) = windows
                .get(&clip.line_index)
                .and_then(|w| w.split(clip.slots as usize).get(clip.slot as usize).copied())
            {
                clip.window = window;
            }
            clip
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::keywords::StopwordExtractor;
    use vgen_models::check_coverage;

    fn candidate(id: &str, duration_ms: Option<u64>) -> MediaCandidate {
        MediaCandidate {
            source_id: id.to_string(),
            media_ref: format!("https://media/{}", id),
            duration_ms,
            width: None,
            height: None,
        }
    }

    fn script() -> Script {
        Script::from_pairs([
            ("A", "Deep ocean vents host strange creatures"),
            ("B", "Tube worms thrive without sunlight"),
            ("A", "Bacteria convert chemicals into energy"),
        ])
    }

    #[test]
    fn test_plan_windows_gapless() {
        let config = PipelineConfig::default();
        let plans = plan_windows(&script(), 9_001, &config, &StopwordExtractor);

        assert_eq!(plans.len(), 6);
        assert_eq!(plans[0].window.start_ms, 0);
        assert_eq!(plans.last().unwrap().window.end_ms, 9_001);
        for pair in plans.windows(2) {
            assert_eq!(pair[0].window.end_ms, pair[1].window.start_ms);
        }
        assert_eq!(plans[1].slot, 1);
        assert_eq!(plans[1].slots, 2);
    }

    struct Silent;

    impl KeywordExtractor for Silent {
        fn queries(&self, text: &str, _max: usize) -> Vec<String> {
            if text.starts_with("Tube") {
                vec![" ".to_string()]
            } else if text.starts_with("Bacteria") {
                Vec::new()
            } else {
                vec!["vents".to_string()]
            }
        }
    }

    #[test]
    fn test_plan_windows_keeps_lines_without_queries() {
        let config = PipelineConfig::default();
        let plans = plan_windows(&script(), 9_000, &config, &Silent);

        assert_eq!(plans.len(), 3);
        assert_eq!(plans[1].query, FALLBACK_QUERY);
        assert_eq!(plans[2].query, FALLBACK_QUERY);
        assert_eq!(plans[2].line_index, 2);
        assert_eq!(plans[2].window.end_ms, 9_000);
        for pair in plans.windows(2) {
            assert_eq!(pair[0].window.end_ms, pair[1].window.start_ms);
        }
    }

    #[test]
    fn test_rank_candidates_by_fit() {
        let mut candidates = vec![
            candidate("short", Some(2_000)),
            candidate("unknown", None),
            candidate("long", Some(20_000)),
            candidate("fit", Some(5_000)),
        ];
        rank_candidates(&mut candidates, 4_000);

        let ids: Vec<&str> = candidates.iter().map(|c| c.source_id.as_str()).collect();
        assert_eq!(ids, vec!["fit", "long", "unknown", "short"]);
    }

    #[test]
    fn test_select_sources_avoids_consecutive_repeats() {
        let window = |ids: &[&str]| WindowSearch {
            provider: Some(0),
            candidates: ids.iter().map(|id| candidate(id, Some(5_000))).collect(),
            reachable: true,
            errors: Vec::new(),
        };
        let searches = vec![
            window(&["x", "y"]),
            window(&["x", "y"]),
            window(&["x"]),
            WindowSearch::default(),
            window(&["x"]),
        ];

        let selections = select_sources(&searches);
        assert_eq!(selections[0][0], 0); // x
        assert_eq!(selections[1][0], 1); // y, second-ranked substituted
        assert_eq!(selections[2][0], 0); // x again, not consecutive
        assert!(selections[3].is_empty());
        assert_eq!(selections[4][0], 0);
    }

    #[test]
    fn test_retime_clips_follows_segments() {
        let clip = |line_index: usize, slot: u32| MaterialClip {
            provider: "p".to_string(),
            source_id: format!("{}-{}", line_index, slot),
            source: ClipSource::Color {
                color: "black".to_string(),
            },
            query: "q".to_string(),
            window: TimeWindow::new(0, 1),
            line_index,
            slot,
            slots: 2,
            source_duration_ms: None,
            is_filler: false,
        };
        let segment = |line_index: usize, start_ms: u64, duration_ms: u64| VoiceSegment {
            line_index,
            start_ms,
            duration_ms,
            audio_path: PathBuf::from("a.mp3"),
            engine: "edge".to_string(),
            voice_id: "v".to_string(),
        };

        let clips = vec![clip(0, 0), clip(0, 1), clip(1, 0), clip(1, 1)];
        let segments = vec![segment(0, 0, 1_001), segment(1, 1_001, 2_000)];
        let retimed = retime_clips(&clips, &segments);

        assert_eq!(retimed[1].window, TimeWindow::new(500, 1_001));
        assert_eq!(retimed[3].window, TimeWindow::new(2_001, 3_001));
        assert!(check_coverage(&retimed, 3_001, 0).is_ok());
    }

    #[test]
    fn test_estimate_has_floor() {
        let long = "x".repeat(150);
        let script = Script::from_pairs([("A", "Hi"), ("B", long.as_str())]);
        assert_eq!(estimate_timeline_ms(&script, 15.0), MIN_LINE_MS + 10_000);
    }
}
