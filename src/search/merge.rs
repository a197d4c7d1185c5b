//! Reassembles contiguous passages around selected chunks.

use std::collections::{BTreeMap, HashMap};

use super::vector::Chunk;
use crate::config::RetrievalConfig;
use crate::source::SourceKey;

/// Window expansion settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Neighbours taken on each side of a selected position
    pub window: usize,
    /// When set, windows separated by at most this many positions are joined
    pub proximity_gap: Option<usize>,
}

impl MergeOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            window: config.merge_window,
            proximity_gap: config.proximity_merge.then_some(config.proximity_gap),
        }
    }
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            window: 1,
            proximity_gap: None,
        }
    }
}

/// A merged run of chunks from one source, covering positions `start..=end`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passage {
    pub source: SourceKey,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Expand every position by `window`, clamp to `0..=max_position`, and
/// coalesce ranges that share a position. With a proximity gap, ranges with
/// at most `gap` positions between them are joined as well.
pub fn merge_ranges(
    positions: &[usize],
    max_position: usize,
    options: &MergeOptions,
) -> Vec<(usize, usize)> {
    let mut sorted = positions.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let reach = options.proximity_gap.map_or(0, |gap| gap + 1);
    let mut ranges: Vec<(usize, usize)> = Vec::new();

    for pos in sorted.into_iter().filter(|&p| p <= max_position) {
        let start = pos.saturating_sub(options.window);
        let end = pos.saturating_add(options.window).min(max_position);
        match ranges.last_mut() {
            Some(last) if start <= last.1.saturating_add(reach) => last.1 = last.1.max(end),
            _ => ranges.push((start, end)),
        }
    }
    ranges
}

/// Merge the `selected` chunks (in rank order) into passages using the full
/// chunk set of the index.
///
/// Sources appear in the order of their best-ranked selected chunk; passages
/// within a source are in position order and never overlap. Positions absent
/// from `all_chunks` are skipped when joining text.
pub fn merge_adjacent_chunks(
    selected: &[Chunk],
    all_chunks: &[Chunk],
    options: &MergeOptions,
) -> Vec<Passage> {
    let mut source_order: Vec<&str> = Vec::new();
    let mut selected_by_source: HashMap<&str, Vec<usize>> = HashMap::new();
    for chunk in selected {
        let positions = selected_by_source.entry(chunk.source.as_str()).or_default();
        if positions.is_empty() {
            source_order.push(chunk.source.as_str());
        }
        positions.push(chunk.position);
    }

    let mut texts: HashMap<&str, BTreeMap<usize, &str>> = HashMap::new();
    for chunk in all_chunks {
        if selected_by_source.contains_key(chunk.source.as_str()) {
            texts
                .entry(chunk.source.as_str())
                .or_default()
                .insert(chunk.position, chunk.text.as_str());
        }
    }
    // Selected chunks are always available even if absent from the full set
    for chunk in selected {
        texts
            .entry(chunk.source.as_str())
            .or_default()
            .entry(chunk.position)
            .or_insert(chunk.text.as_str());
    }

    let mut passages = Vec::new();
    for source in source_order {
        let Some(by_position) = texts.get(source) else {
            continue;
        };
        let max_position = by_position.keys().next_back().copied().unwrap_or(0);

        for (start, end) in merge_ranges(&selected_by_source[source], max_position, options) {
            let text = by_position
                .range(start..=end)
                .map(|(_, t)| *t)
                .collect::<Vec<_>>()
                .join("\n");
            log::debug!(
                "Merged positions {}..={} of {} into one passage",
                start,
                end,
                source
            );
            passages.push(Passage {
                source: source.to_string(),
                start,
                end,
                text,
            });
        }
    }
    passages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(source: &str, n: usize) -> Vec<Chunk> {
        (0..n).map(|i| Chunk::new(source, i, format!("{}{}", source, i))).collect()
    }

    fn pick(all: &[Chunk], source: &str, positions: &[usize]) -> Vec<Chunk> {
        positions
            .iter()
            .map(|p| {
                all.iter()
                    .find(|c| c.source == source && c.position == *p)
                    .unwrap()
                    .clone()
            })
            .collect()
    }

    #[test]
    fn test_window_merge_example() {
        let all = corpus("doc", 12);
        let selected = pick(&all, "doc", &[9, 3, 5, 4]);
        let passages = merge_adjacent_chunks(&selected, &all, &MergeOptions::default());

        assert_eq!(passages.len(), 2);
        assert_eq!((passages[0].start, passages[0].end), (2, 6));
        assert_eq!(passages[0].text, "doc2\ndoc3\ndoc4\ndoc5\ndoc6");
        assert_eq!((passages[1].start, passages[1].end), (8, 10));
        assert_eq!(passages[1].text, "doc8\ndoc9\ndoc10");
    }

    #[test]
    fn test_window_clamped_at_edges() {
        let options = MergeOptions { window: 1, proximity_gap: None };
        assert_eq!(merge_ranges(&[0, 5], 5, &options), vec![(0, 1), (4, 5)]);
        assert_eq!(merge_ranges(&[0, 4], 5, &options), vec![(0, 1), (3, 5)]);
        // touching ranges stay separate passages
        assert_eq!(merge_ranges(&[0, 3], 5, &options), vec![(0, 1), (2, 4)]);
        // positions past the end are ignored
        assert_eq!(merge_ranges(&[7], 5, &options), Vec::<(usize, usize)>::new());
    }

    #[test]
    fn test_zero_window_keeps_single_chunks() {
        let ranges = merge_ranges(&[1, 3], 10, &MergeOptions { window: 0, proximity_gap: None });
        assert_eq!(ranges, vec![(1, 1), (3, 3)]);
    }

    #[test]
    fn test_proximity_merge_joins_close_windows() {
        let options = MergeOptions {
            window: 1,
            proximity_gap: Some(2),
        };
        // [2..4] and [7..9] are separated by positions 5 and 6
        assert_eq!(merge_ranges(&[3, 8], 20, &options), vec![(2, 9)]);
        // a three-position gap stays split
        assert_eq!(merge_ranges(&[3, 9], 20, &options), vec![(2, 4), (8, 10)]);
    }

    #[test]
    fn test_touching_windows_join_only_with_proximity() {
        let plain = MergeOptions { window: 1, proximity_gap: None };
        assert_eq!(merge_ranges(&[3, 6], 20, &plain), vec![(2, 4), (5, 7)]);

        let proximity = MergeOptions { window: 1, proximity_gap: Some(0) };
        assert_eq!(merge_ranges(&[3, 6], 20, &proximity), vec![(2, 7)]);
    }

    #[test]
    fn test_proximity_passage_includes_gap_chunks() {
        let all = corpus("t", 10);
        let selected = pick(&all, "t", &[1, 5]);
        let options = MergeOptions {
            window: 0,
            proximity_gap: Some(3),
        };
        let passages = merge_adjacent_chunks(&selected, &all, &options);
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "t1\nt2\nt3\nt4\nt5");
    }

    #[test]
    fn test_sources_in_rank_order() {
        let mut all = corpus("a", 3);
        all.extend(corpus("b", 3));
        let mut selected = pick(&all, "b", &[1]);
        selected.extend(pick(&all, "a", &[0]));
        selected.extend(pick(&all, "b", &[2]));

        let passages = merge_adjacent_chunks(&selected, &all, &MergeOptions::default());
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].source, "b");
        assert_eq!(passages[0].text, "b0\nb1\nb2");
        assert_eq!(passages[1].source, "a");
        assert_eq!(passages[1].text, "a0\na1");
    }

    #[test]
    fn test_duplicate_selection_emitted_once() {
        let all = corpus("a", 5);
        let mut selected = pick(&all, "a", &[2]);
        selected.extend(pick(&all, "a", &[2]));
        let passages = merge_adjacent_chunks(&selected, &all, &MergeOptions::default());
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "a1\na2\na3");
    }

    #[test]
    fn test_empty_selection() {
        let all = corpus("a", 5);
        assert!(merge_adjacent_chunks(&[], &all, &MergeOptions::default()).is_empty());
    }

    #[test]
    fn test_from_config() {
        let mut config = RetrievalConfig::default();
        assert_eq!(MergeOptions::from_config(&config), MergeOptions::default());
        config.proximity_merge = true;
        config.merge_window = 2;
        assert_eq!(
            MergeOptions::from_config(&config),
            MergeOptions {
                window: 2,
                proximity_gap: Some(2)
            }
        );
    }
}
