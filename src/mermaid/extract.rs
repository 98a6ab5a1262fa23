//! Fenced ```mermaid ... ``` block extraction (§4.6 step 1): locates blocks
//! by fence markers and preserves byte offsets so a validated replacement can
//! be substituted in place without re-parsing the whole document.

/// One fenced Mermaid block found in a document.
#[derive(Debug, Clone, PartialEq)]
pub struct MermaidBlock {
    pub index: usize,
    /// Byte range of the block's body (excluding the fence lines themselves).
    pub byte_range: (usize, usize),
    pub text: String,
}

const FENCE_OPEN: &str = "```mermaid";
const FENCE_CLOSE: &str = "```";

pub fn extract_blocks(document: &str) -> Vec<MermaidBlock> {
    let mut blocks = Vec::new();
    let mut search_from = 0usize;
    let mut index = 0usize;

    while let Some(open_rel) = document[search_from..].find(FENCE_OPEN) {
        let open_abs = search_from + open_rel;
        let body_start = match document[open_abs..].find('\n') {
            Some(newline_rel) => open_abs + newline_rel + 1,
            None => break,
        };

        let close_rel = match document[body_start..].find(FENCE_CLOSE) {
            Some(rel) => rel,
            None => break,
        };
        let body_end = body_start + close_rel;
        let fence_close_end = body_end + FENCE_CLOSE.len();

        blocks.push(MermaidBlock {
            index,
            byte_range: (body_start, body_end),
            text: document[body_start..body_end].to_string(),
        });

        index += 1;
        search_from = fence_close_end;
    }

    blocks
}

/// Substitutes `replacement` for the block's body at `byte_range`, returning
/// the new document. Byte ranges of blocks after this one shift, so callers
/// substituting multiple blocks must work from the last offset backward.
pub fn substitute_block(document: &str, byte_range: (usize, usize), replacement: &str) -> String {
    let (start, end) = byte_range;
    format!("{}{}{}", &document[..start], replacement, &document[end..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_a_single_block_with_correct_offsets() {
        let doc = "intro\n```mermaid\ngraph TD\nA-->B\n```\noutro";
        let blocks = extract_blocks(doc);
        assert_eq!(blocks.len(), 1);
        let (start, end) = blocks[0].byte_range;
        assert_eq!(&doc[start..end], "graph TD\nA-->B\n");
    }

    #[test]
    fn extracts_multiple_blocks_in_order() {
        let doc = "```mermaid\ngraph TD\nA-->B\n```\ntext\n```mermaid\npie\n\"a\" : 1\n```\n";
        let blocks = extract_blocks(doc);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].index, 0);
        assert_eq!(blocks[1].index, 1);
        assert!(blocks[1].text.starts_with("pie"));
    }

    #[test]
    fn substitute_replaces_only_the_targeted_range() {
        let doc = "a\n```mermaid\nbad\n```\nb";
        let blocks = extract_blocks(doc);
        let replaced = substitute_block(doc, blocks[0].byte_range, "graph TD\nA-->B\n");
        assert!(replaced.contains("graph TD\nA-->B"));
        assert!(!replaced.contains("bad"));
    }
}
