//! Pluggable text chunking.
//!
//! The reference pipeline indexes one chunk per page, but the chunking
//! policy is a seam: swapping in a splitter must not change any
//! downstream stage.

use regex::Regex;

// ============================================================================
// Chunker trait
// ============================================================================

/// Splits a document's content into indexable chunks.
pub trait Chunker: Send + Sync {
    fn chunk(&self, text: &str) -> Vec<String>;

    fn name(&self) -> &'static str;
}

// ============================================================================
// WholePageChunker
// ============================================================================

/// One chunk per document. Empty content yields no chunks.
pub struct WholePageChunker;

impl Chunker for WholePageChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            vec![]
        } else {
            vec![trimmed.to_string()]
        }
    }

    fn name(&self) -> &'static str {
        "WholePageChunker"
    }
}

// ============================================================================
// SectionChunker
// ============================================================================

/// Splits on markdown-style headers outside code fences, then packs
/// paragraphs into chunks of at most `max_characters`.
pub struct SectionChunker {
    max_characters: usize,
}

impl SectionChunker {
    pub fn new(max_characters: usize) -> Self {
        Self { max_characters }
    }

    fn split_sections(&self, text: &str) -> Vec<String> {
        let header_re = Regex::new(r"(?m)^#{1,6}\s+").unwrap();
        let mut sections = Vec::new();
        let mut current = String::new();
        let mut in_code_block = false;

        for line in text.lines() {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
            }

            if !in_code_block && header_re.is_match(line) && !current.trim().is_empty() {
                sections.push(current.trim().to_string());
                current.clear();
            }

            current.push_str(line);
            current.push('\n');
        }

        if !current.trim().is_empty() {
            sections.push(current.trim().to_string());
        }
        sections
    }

    fn pack_paragraphs(&self, section: &str) -> Vec<String> {
        if section.len() <= self.max_characters {
            return vec![section.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();

        for para in section.split("\n\n") {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }

            if !current.is_empty() && current.len() + para.len() + 2 > self.max_characters {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(para);
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

impl Default for SectionChunker {
    fn default() -> Self {
        Self::new(1500)
    }
}

impl Chunker for SectionChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        self.split_sections(text)
            .into_iter()
            .flat_map(|s| self.pack_paragraphs(&s))
            .filter(|c| !c.trim().is_empty())
            .collect()
    }

    fn name(&self) -> &'static str {
        "SectionChunker"
    }
}

/// Default chunking policy: one chunk per page.
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(WholePageChunker)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_page_single_chunk() {
        let chunks = WholePageChunker.chunk("  some page content  ");
        assert_eq!(chunks, vec!["some page content".to_string()]);
    }

    #[test]
    fn test_whole_page_empty() {
        assert!(WholePageChunker.chunk("   \n ").is_empty());
    }

    #[test]
    fn test_section_chunker_splits_on_headers() {
        let chunker = SectionChunker::new(100);
        let text = "# First\n\ncontent one\n\n# Second\n\ncontent two";
        let chunks = chunker.chunk(text);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains("First"));
        assert!(chunks[1].contains("Second"));
    }

    #[test]
    fn test_section_chunker_ignores_headers_in_code() {
        let chunker = SectionChunker::new(500);
        let text = "# Intro\n\n```\n# not a header\n```\n\ntail";
        let chunks = chunker.chunk(text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("# not a header"));
    }

    #[test]
    fn test_section_chunker_packs_long_sections() {
        let chunker = SectionChunker::new(30);
        let text = "first paragraph here\n\nsecond paragraph here\n\nthird paragraph here";
        let chunks = chunker.chunk(text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 45);
        }
    }

    #[test]
    fn test_section_chunker_empty() {
        assert!(SectionChunker::default().chunk("").is_empty());
    }
}
