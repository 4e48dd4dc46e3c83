//! Pretty printing utilities for IR nodes.
//!
//! IR dumps are built as `pretty` documents so nested loop bodies indent
//! consistently regardless of how deep the generated nest is.

use pretty::{BoxAllocator, DocAllocator, DocBuilder};
use std::fmt;

/// Default line width for pretty printing.
pub const DEFAULT_WIDTH: usize = 100;

/// Number of columns a nested block is indented by.
pub const INDENT: isize = 2;

/// A pretty-printable value.
pub trait PrettyPrint {
    /// Convert to a pretty document.
    fn to_doc<'a>(&self, allocator: &'a BoxAllocator) -> DocBuilder<'a, BoxAllocator>;

    /// Pretty print to a string with the given width.
    fn pretty_print(&self, width: usize) -> String {
        let allocator = BoxAllocator;
        let rendered = self.to_doc(&allocator).into_doc().pretty(width).to_string();
        rendered
    }

    /// Pretty print with default width.
    fn pretty(&self) -> String {
        self.pretty_print(DEFAULT_WIDTH)
    }
}

/// Wrap `body` in a brace-delimited block on its own lines.
pub fn braced<'a>(
    allocator: &'a BoxAllocator,
    body: DocBuilder<'a, BoxAllocator>,
) -> DocBuilder<'a, BoxAllocator> {
    allocator
        .text("{")
        .append(allocator.hardline().append(body).nest(INDENT))
        .append(allocator.hardline())
        .append(allocator.text("}"))
}

/// Format a list with separators.
pub fn format_list<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Loop;

    impl PrettyPrint for Loop {
        fn to_doc<'a>(&self, allocator: &'a BoxAllocator) -> DocBuilder<'a, BoxAllocator> {
            allocator
                .text("for (i, 0, 4)")
                .append(allocator.hardline())
                .append(braced(allocator, allocator.text("A[i] = 0")))
        }
    }

    #[test]
    fn test_braced_block() {
        let out = Loop.pretty();
        assert_eq!(out, "for (i, 0, 4)\n{\n  A[i] = 0\n}");
    }

    #[test]
    fn test_format_list() {
        assert_eq!(format_list(&[1, 2, 3], ", "), "1, 2, 3");
        assert_eq!(format_list::<i32>(&[], ", "), "");
    }
}
