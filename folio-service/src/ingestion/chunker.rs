//! Fixed-size character windows with overlap.

use super::{ExtractedPage, TextSource};
use crate::config::ChunkingSettings;

/// One slice of page text, the unit that gets embedded
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Position across the whole document, starting at 0
    pub chunk_index: u32,
    pub page_number: u32,
    pub source: TextSource,
    pub text: String,
    /// Leading characters repeated from the previous chunk of the same page
    pub leading_overlap: usize,
}

impl Chunk {
    /// The part of the chunk not shared with its predecessor
    pub fn fresh_text(&self) -> &str {
        match self.text.char_indices().nth(self.leading_overlap) {
            Some((byte_offset, _)) => &self.text[byte_offset..],
            None => "",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(settings: ChunkingSettings) -> Self {
        Self {
            size: settings.chunk_size.max(1),
            overlap: settings.chunk_overlap.min(settings.chunk_size.saturating_sub(1)),
        }
    }

    /// Split pages in order. Whitespace-only pages produce no chunks.
    pub fn split(&self, pages: &[ExtractedPage]) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for page in pages {
            if page.is_blank() {
                continue;
            }

            let chars: Vec<char> = page.text.chars().collect();
            let mut start = 0;
            let mut previous_end: usize = 0;

            loop {
                let end = (start + self.size).min(chars.len());
                chunks.push(Chunk {
                    chunk_index: chunks.len() as u32,
                    page_number: page.page_number,
                    source: page.source,
                    text: chars[start..end].iter().collect(),
                    leading_overlap: previous_end.saturating_sub(start),
                });

                if end == chars.len() {
                    break;
                }
                previous_end = end;
                start = end - self.overlap;
            }
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkingSettings {
            chunk_size: size,
            chunk_overlap: overlap,
        })
    }

    #[test]
    fn test_window_and_overlap() {
        let pages = vec![ExtractedPage::native(1, "abcdefghij")];
        let chunks = chunker(4, 1).split(&pages);

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "defg", "ghij"]);
        assert_eq!(chunks[0].leading_overlap, 0);
        assert_eq!(chunks[1].leading_overlap, 1);
        assert_eq!(chunks[2].chunk_index, 2);
    }

    #[test]
    fn test_short_page_is_single_chunk() {
        let pages = vec![ExtractedPage::native(3, "tiny")];
        let chunks = chunker(1000, 200).split(&pages);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_number, 3);
        assert_eq!(chunks[0].text, "tiny");
    }

    #[test]
    fn test_blank_pages_produce_nothing() {
        let pages = vec![ExtractedPage::native(1, ""), ExtractedPage::native(2, "  \n ")];
        assert!(chunker(10, 2).split(&pages).is_empty());
    }

    #[test]
    fn test_round_trip_reconstructs_pages_in_order() {
        let pages = vec![
            ExtractedPage::native(1, "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(40)),
            ExtractedPage::native(2, ""),
            ExtractedPage::ocr(3, "Ünïcödé tëxt spans multiple byte widths ✓ ".repeat(25)),
            ExtractedPage::native(4, "end"),
        ];

        for (size, overlap) in [(1000, 200), (100, 0), (37, 36), (1, 0)] {
            let chunks = chunker(size, overlap).split(&pages);

            for page in pages.iter().filter(|p| !p.is_blank()) {
                let rebuilt: String = chunks
                    .iter()
                    .filter(|c| c.page_number == page.page_number)
                    .map(Chunk::fresh_text)
                    .collect();
                assert_eq!(rebuilt, page.text, "size={} overlap={}", size, overlap);
            }

            let order: Vec<u32> = chunks.iter().map(|c| c.page_number).collect();
            let mut sorted = order.clone();
            sorted.sort();
            assert_eq!(order, sorted);
            assert!(chunks.iter().all(|c| c.text.chars().count() <= size));
        }
    }
}
