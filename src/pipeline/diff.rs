//! Structured diff between two snapshots of a page.
//!
//! Classifies the change between two stored versions into three
//! categories, each entry carrying a fixed priority:
//!
//! | Category  | Signals                                              | Priority |
//! |-----------|------------------------------------------------------|----------|
//! | content   | title, h1 set, meta description, og:title, words     | 3-5      |
//! | structure | main/nav/header/footer/form/iframe/script, sections  | 1-2      |
//! | style     | `<style>` blocks, inline `style=` attributes         | 1-2      |
//!
//! Results are cached per `(site, date, url)` for an hour.

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, warn};
use regex::Regex;
use scraper::{Html, Selector};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::Result;
use crate::models::{
    Change, ChangeKind, DetailedDiff, DiffCacheEntry, DiffMetadata, DiffOptions, DiffSummary,
    TruncationSplit,
};
use crate::storage::{PutOptions, SiteStore, keys};

/// Documents above this size are compared on a prefix only.
const PARTIAL_THRESHOLD: usize = 500 * 1024;
const PARTIAL_PREFIX: usize = 100 * 1024;

const CACHE_TTL: Duration = Duration::from_secs(60 * 60);
const MAX_CACHE_ENTRY: usize = 256 * 1024;

/// Added/removed words listed per change.
const MAX_WORDS_SHOWN: usize = 20;
const SNIPPET_LEN: usize = 200;

static STYLE_BLOCK: LazyLock<Regex> = LazyLock::new(|| counter("<style"));
static INLINE_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\sstyle\s*="#).unwrap_or_else(|e| panic!("inline style pattern: {e}"))
});

/// Structural tags and their priorities.
static STRUCTURE_TAGS: LazyLock<Vec<(&'static str, u8, Regex)>> = LazyLock::new(|| {
    [
        ("main", 2),
        ("nav", 2),
        ("header", 2),
        ("footer", 2),
        ("form", 2),
        ("iframe", 2),
        ("script", 2),
        ("section", 1),
        ("article", 1),
        ("aside", 1),
        ("a", 1),
    ]
    .into_iter()
    .map(|(tag, priority)| (tag, priority, counter(&format!("<{tag}"))))
    .collect()
});

fn counter(open_tag: &str) -> Regex {
    Regex::new(&format!(r"(?i){open_tag}\b"))
        .unwrap_or_else(|e| panic!("tag counter {open_tag}: {e}"))
}

/// Two versions of a page to compare.
#[derive(Debug, Clone, Copy)]
pub struct DiffInput<'a> {
    pub site_id: &'a str,
    pub date: &'a str,
    pub url: &'a str,
    pub previous: &'a str,
    pub current: &'a str,
    pub previous_hash: &'a str,
    pub current_hash: &'a str,
}

/// Diff generator backed by the store's diff cache.
#[derive(Clone)]
pub struct DiffClassifier {
    store: SiteStore,
}

impl DiffClassifier {
    pub fn new(store: SiteStore) -> Self {
        Self { store }
    }

    /// Build (or fetch from cache) the diff for `input`.
    ///
    /// Cache failures are reported as warnings on the diff, never as errors.
    pub async fn generate_diff(&self, input: DiffInput<'_>, options: &DiffOptions) -> DetailedDiff {
        let key = keys::diff(input.site_id, input.date, input.url);
        let mut cache_warning = None;

        if options.cache_enabled {
            match self.store.get_json::<DiffCacheEntry>(&key).await {
                Ok(Some(entry))
                    if entry.expires_at > Utc::now()
                        && entry.options == *options
                        && entry.diff.previous_hash == input.previous_hash
                        && entry.diff.current_hash == input.current_hash =>
                {
                    debug!("Diff cache hit: {}", key);
                    let mut diff = entry.diff;
                    diff.metadata.from_cache = true;
                    return diff;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Diff cache read failed for {}: {}", key, e);
                    cache_warning = Some(format!("cache read failed: {e}"));
                }
            }
        }

        let mut diff = classify(input, options);
        diff.metadata.warnings.extend(cache_warning);

        if options.cache_enabled {
            if let Err(e) = self.write_cache(&key, &diff, options).await {
                warn!("Diff cache write failed for {}: {}", key, e);
                diff.metadata.warnings.push(format!("cache write failed: {e}"));
            }
        }
        diff
    }

    /// Diff `prev_latest` against `latest` for a URL, if both are stored.
    pub async fn diff_latest(
        &self,
        site_id: &str,
        url: &str,
        options: &DiffOptions,
    ) -> Result<Option<DetailedDiff>> {
        let Some(pair) = self.store.snapshot_pair(site_id, url).await? else {
            return Ok(None);
        };
        let date = pair.current.date();
        let input = DiffInput {
            site_id,
            date: &date,
            url,
            previous: &pair.previous_content,
            current: &pair.current_content,
            previous_hash: pair.previous.comparison_hash(),
            current_hash: pair.current.comparison_hash(),
        };
        Ok(Some(self.generate_diff(input, options).await))
    }

    async fn write_cache(&self, key: &str, diff: &DetailedDiff, options: &DiffOptions) -> Result<()> {
        let entry = DiffCacheEntry {
            diff: diff.clone(),
            options: options.clone(),
            expires_at: Utc::now() + chrono::Duration::seconds(CACHE_TTL.as_secs() as i64),
        };
        let raw = serde_json::to_string(&entry)?;
        if raw.len() > MAX_CACHE_ENTRY {
            debug!("Diff for {} too large to cache ({} bytes)", key, raw.len());
            return Ok(());
        }
        self.store.kv().put(key, &raw, PutOptions::ttl(CACHE_TTL)).await
    }
}

/// Compute a diff without touching the cache.
pub fn classify(input: DiffInput<'_>, options: &DiffOptions) -> DetailedDiff {
    let started = Instant::now();
    let mut warnings = Vec::new();

    let partial = input.previous.len() > PARTIAL_THRESHOLD || input.current.len() > PARTIAL_THRESHOLD;
    let (previous, current) = if partial {
        warnings.push(format!(
            "document over {} KB, compared first {} KB",
            PARTIAL_THRESHOLD / 1024,
            PARTIAL_PREFIX / 1024
        ));
        (prefix(input.previous, PARTIAL_PREFIX), prefix(input.current, PARTIAL_PREFIX))
    } else {
        (input.previous, input.current)
    };

    let content = if options.include_content {
        content_changes(previous, current)
    } else {
        Vec::new()
    };
    let style = if options.include_style {
        style_changes(previous, current)
    } else {
        Vec::new()
    };
    let structure = if options.include_structure {
        structure_changes(previous, current)
    } else {
        Vec::new()
    };

    let mut diff = DetailedDiff {
        url: input.url.to_string(),
        date: input.date.to_string(),
        previous_hash: input.previous_hash.to_string(),
        current_hash: input.current_hash.to_string(),
        content,
        style,
        structure,
        summary: DiffSummary::default(),
        metadata: DiffMetadata {
            generated_at: Utc::now(),
            partial,
            truncated: false,
            from_cache: false,
            processing_ms: 0,
            previous_size: input.previous.len(),
            current_size: input.current.len(),
            warnings,
        },
    };
    diff.refresh_summary();

    if let Some(max) = options.max_changes {
        limit_changes(&mut diff, max, &options.split);
    }
    diff.metadata.processing_ms = started.elapsed().as_millis() as u64;
    diff
}

/// Truncate to at most `max` changes, split across categories.
///
/// Each category is sorted by priority (highest first) and truncated to a
/// prefix, so a lower-priority entry never survives a higher-priority one
/// of the same category. Quota a category cannot use is handed on in
/// content, structure, style order.
pub fn limit_changes(diff: &mut DetailedDiff, max: usize, split: &TruncationSplit) {
    let total = diff.content.len() + diff.style.len() + diff.structure.len();
    if total <= max {
        return;
    }

    for list in [&mut diff.content, &mut diff.style, &mut diff.structure] {
        list.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    let [content_quota, style_quota, structure_quota] = quotas(max, split);

    let mut take_content = diff.content.len().min(content_quota);
    let mut take_structure = diff.structure.len().min(structure_quota);
    let mut take_style = diff.style.len().min(style_quota);

    let mut leftover = max.saturating_sub(take_content + take_structure + take_style);
    for (take, available) in [
        (&mut take_content, diff.content.len()),
        (&mut take_structure, diff.structure.len()),
        (&mut take_style, diff.style.len()),
    ] {
        let extra = leftover.min(available - *take);
        *take += extra;
        leftover -= extra;
    }

    diff.content.truncate(take_content);
    diff.structure.truncate(take_structure);
    diff.style.truncate(take_style);
    diff.metadata.truncated = true;
    diff.refresh_summary();
}

/// Per-category quotas from a split normalized by its sum. Rounding
/// remainders are left for redistribution.
fn quotas(max: usize, split: &TruncationSplit) -> [usize; 3] {
    let weight = |f: f64| if f.is_finite() { f.max(0.0) } else { 0.0 };
    let mut fractions = [
        weight(split.content),
        weight(split.style),
        weight(split.structure),
    ];
    let mut sum: f64 = fractions.iter().sum();
    if sum <= 0.0 {
        let fallback = TruncationSplit::default();
        fractions = [fallback.content, fallback.style, fallback.structure];
        sum = fractions.iter().sum();
    }
    fractions.map(|f| ((max as f64) * f / sum).floor() as usize)
}

/// Longest prefix of at most `max` bytes ending on a char boundary.
fn prefix(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// --- Content ---

#[derive(Debug, Default)]
struct PageSignals {
    title: Option<String>,
    h1: BTreeSet<String>,
    description: Option<String>,
    og_title: Option<String>,
    words: BTreeSet<String>,
}

impl PageSignals {
    fn extract(html: &str) -> Self {
        let doc = Html::parse_document(html);
        Self {
            title: select_texts(&doc, "title").into_iter().next(),
            h1: select_texts(&doc, "h1").into_iter().collect(),
            description: meta_content(&doc, r#"meta[name="description"]"#),
            og_title: meta_content(&doc, r#"meta[property="og:title"]"#),
            words: visible_words(&doc),
        }
    }
}

fn select_texts(doc: &Html, css: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(css) else {
        return Vec::new();
    };
    doc.select(&selector)
        .map(|el| collapse(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .collect()
}

fn meta_content(doc: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    doc.select(&selector)
        .find_map(|el| el.value().attr("content"))
        .map(collapse)
        .filter(|c| !c.is_empty())
}

/// Lowercased words longer than three characters outside script/style.
fn visible_words(doc: &Html) -> BTreeSet<String> {
    let mut words = BTreeSet::new();
    for node in doc.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript"))
        });
        if hidden {
            continue;
        }
        for word in text.unicode_words() {
            if word.chars().count() > 3 {
                words.insert(word.to_lowercase());
            }
        }
    }
    words
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn snippet(s: &str) -> String {
    if s.chars().count() <= SNIPPET_LEN {
        return s.to_string();
    }
    let cut: String = s.chars().take(SNIPPET_LEN).collect();
    format!("{cut}…")
}

fn field_change(
    element: &str,
    before: Option<&str>,
    after: Option<&str>,
    priority: u8,
) -> Option<Change> {
    let kind = match (before, after) {
        (None, None) => return None,
        (Some(a), Some(b)) if a == b => return None,
        (None, Some(_)) => ChangeKind::Added,
        (Some(_), None) => ChangeKind::Removed,
        (Some(_), Some(_)) => ChangeKind::Modified,
    };
    Some(Change {
        element: element.to_string(),
        kind,
        before: before.map(snippet),
        after: after.map(snippet),
        priority,
    })
}

fn word_list(words: &[&String]) -> String {
    let shown: Vec<&str> = words
        .iter()
        .take(MAX_WORDS_SHOWN)
        .map(|w| w.as_str())
        .collect();
    let mut out = shown.join(", ");
    if words.len() > MAX_WORDS_SHOWN {
        out.push_str(&format!(" (+{} more)", words.len() - MAX_WORDS_SHOWN));
    }
    out
}

fn content_changes(previous: &str, current: &str) -> Vec<Change> {
    let before = PageSignals::extract(previous);
    let after = PageSignals::extract(current);
    let mut changes = Vec::new();

    changes.extend(field_change(
        "title",
        before.title.as_deref(),
        after.title.as_deref(),
        5,
    ));

    if before.h1 != after.h1 {
        let join = |set: &BTreeSet<String>| {
            (!set.is_empty()).then(|| set.iter().cloned().collect::<Vec<_>>().join(" | "))
        };
        changes.extend(field_change(
            "h1",
            join(&before.h1).as_deref(),
            join(&after.h1).as_deref(),
            4,
        ));
    }

    changes.extend(field_change(
        "meta-description",
        before.description.as_deref(),
        after.description.as_deref(),
        4,
    ));
    changes.extend(field_change(
        "og:title",
        before.og_title.as_deref(),
        after.og_title.as_deref(),
        3,
    ));

    let added: Vec<&String> = after.words.difference(&before.words).collect();
    let removed: Vec<&String> = before.words.difference(&after.words).collect();
    if !added.is_empty() {
        changes.push(Change {
            element: "text".to_string(),
            kind: ChangeKind::Added,
            before: None,
            after: Some(word_list(&added)),
            priority: 3,
        });
    }
    if !removed.is_empty() {
        changes.push(Change {
            element: "text".to_string(),
            kind: ChangeKind::Removed,
            before: Some(word_list(&removed)),
            after: None,
            priority: 3,
        });
    }
    changes
}

// --- Style and structure ---

fn count_change(element: &str, before: usize, after: usize, priority: u8) -> Option<Change> {
    let kind = match (before, after) {
        (b, a) if b == a => return None,
        (0, _) => ChangeKind::Added,
        (_, 0) => ChangeKind::Removed,
        _ => ChangeKind::Modified,
    };
    Some(Change {
        element: element.to_string(),
        kind,
        before: Some(before.to_string()),
        after: Some(after.to_string()),
        priority,
    })
}

fn style_changes(previous: &str, current: &str) -> Vec<Change> {
    [
        count_change(
            "style-block",
            STYLE_BLOCK.find_iter(previous).count(),
            STYLE_BLOCK.find_iter(current).count(),
            2,
        ),
        count_change(
            "inline-style",
            INLINE_STYLE.find_iter(previous).count(),
            INLINE_STYLE.find_iter(current).count(),
            1,
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn structure_changes(previous: &str, current: &str) -> Vec<Change> {
    STRUCTURE_TAGS
        .iter()
        .filter_map(|(tag, priority, re)| {
            count_change(
                tag,
                re.find_iter(previous).count(),
                re.find_iter(current).count(),
                *priority,
            )
        })
        .collect()
}
