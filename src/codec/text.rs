//! Text rendering of a chain tree. Ports
//! `chainer::scan<T>::integr_data_to_txt`, but as an explicit iterative
//! stack instead of a recursive lambda, so traversal depth isn't bounded
//! by the call stack.

use std::io::Write;

use super::ChainFile;
use crate::{
    chain::Dir,
    error::Error,
};

struct Frame {
    level:          usize,
    dir:            Dir,
    next_child:     usize,
    /// Length `offsets` was truncated to when this frame's own offset
    /// was pushed; restored before each of this frame's children runs.
    depth:          usize,
}

/// Writes one line per complete chain:
/// `<module>[<count>] + 0x<root-offset> -> + 0x<off1> -> ...`.
pub fn render(
    out: &mut dyn Write,
    chain: &ChainFile,
) -> Result<(), Error> {
    let mut offsets: Vec<u64> = Vec::new();
    let mut line = String::new();

    for symbol in &chain.symbols {
        for &sink in &symbol.results {
            offsets.clear();
            offsets.push(sink.address - symbol.start);

            let mut stack = vec![Frame { level: symbol.level as usize, dir: sink, next_child: sink.start as usize, depth: offsets.len() }];

            while let Some(frame) = stack.last_mut() {
                if frame.level == 0 {
                    line.clear();
                    line.push_str(&format!("{}[{}]", symbol.name, symbol.count));
                    for offset in &offsets[..frame.depth] {
                        line.push_str(&format!(" + 0x{:x}", offset));
                    }
                    writeln!(out, "{}", line)?;
                    stack.pop();
                    continue;
                }

                if frame.next_child >= frame.dir.end as usize {
                    stack.pop();
                    continue;
                }

                let child = chain.contents[frame.level - 1][frame.next_child];
                let parent_value = frame.dir.value;
                let parent_depth = frame.depth;
                frame.next_child += 1;

                offsets.truncate(parent_depth);
                offsets.push(child.address.wrapping_sub(parent_value));

                stack.push(Frame { level: frame.level - 1, dir: child, next_child: child.start as usize, depth: offsets.len() });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::ChainSymbol,
        word::WordSize,
    };

    #[test]
    fn direct_hit_renders_a_single_offset_line() {
        let chain = ChainFile {
            word_size: WordSize::W64,
            symbols:   vec![ChainSymbol {
                start:   0x7000_0000,
                name:    "lib.so".to_string(),
                range:   0,
                count:   1,
                level:   0,
                results: vec![Dir { address: 0x7000_0100, value: 0, start: 0, end: 1 }],
            }],
            contents:  Vec::new(),
        };

        let mut buf = Vec::new();
        render(&mut buf, &chain).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "lib.so[1] + 0x100\n");
    }

    #[test]
    fn one_hop_renders_two_offsets() {
        let chain = ChainFile {
            word_size: WordSize::W64,
            symbols:   vec![ChainSymbol {
                start:   0x7000_0000,
                name:    "lib.so".to_string(),
                range:   0,
                count:   1,
                level:   1,
                results: vec![Dir { address: 0x7000_0100, value: 0xCAFE_0000, start: 0, end: 1 }],
            }],
            contents:  vec![vec![Dir { address: 0xCAFE_0010, value: 0, start: 0, end: 1 }]],
        };

        let mut buf = Vec::new();
        render(&mut buf, &chain).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "lib.so[1] + 0x100 -> + 0x10\n");
    }

    #[test]
    fn branching_child_range_yields_two_lines() {
        let chain = ChainFile {
            word_size: WordSize::W64,
            symbols:   vec![ChainSymbol {
                start:   0x7000_0000,
                name:    "lib.so".to_string(),
                range:   0,
                count:   1,
                level:   1,
                results: vec![Dir { address: 0x7000_0100, value: 0xCAFE_0000, start: 0, end: 2 }],
            }],
            contents:  vec![vec![
                Dir { address: 0xCAFE_0010, value: 0, start: 0, end: 1 },
                Dir { address: 0xCAFE_0020, value: 0, start: 0, end: 1 },
            ]],
        };

        let mut buf = Vec::new();
        render(&mut buf, &chain).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "lib.so[1] + 0x100 -> + 0x10\nlib.so[1] + 0x100 -> + 0x20\n");
    }
}
