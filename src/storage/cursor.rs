//! Full-scan cursor over a table tree, in ascending key order.
//!
//! The node header has no "next leaf" pointer, so unlike a typical B+tree
//! cursor this one keeps an explicit stack of unfinished internal
//! ancestors and walks back up to them when a leaf runs out of cells.
use super::btree::{BTreeFile, Cell};
use crate::err;
use crate::errors::Error;
use crate::pager::PageNum;

pub struct Cursor<'f> {
    bt: &'f mut BTreeFile,
    // (page_num, next_child_index) for internal ancestors not yet exhausted.
    stack: Vec<(PageNum, u16)>,
    leaf_page: PageNum,
    leaf_n_cells: u16,
    cell_idx: u16,
    done: bool,
}

impl<'f> Cursor<'f> {
    /// Positions at the first cell of the table tree rooted at `root`.
    pub fn start(bt: &'f mut BTreeFile, root: PageNum) -> Result<Self, Error> {
        let mut stack = Vec::new();
        let mut page = root;
        loop {
            let (page_type, n_cells, right_page) = {
                let n = bt.get_node(page)?;
                (n.page_type, n.n_cells, n.right_page)
            };
            if page_type.is_leaf() {
                return Ok(Cursor {
                    bt,
                    stack,
                    leaf_page: page,
                    leaf_n_cells: n_cells,
                    cell_idx: 0,
                    done: n_cells == 0,
                });
            }
            let child0 = if n_cells == 0 {
                right_page
            } else {
                bt.get_node(page)?.get_cell(0)?.child_page().ok_or_else(|| {
                    err!(CorruptHeader, "internal cell at page {} has no child_page", page)
                })?
            };
            stack.push((page, 1));
            page = child0;
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn current(&mut self) -> Result<Option<Cell>, Error> {
        if self.done {
            return Ok(None);
        }
        let n = self.bt.get_node(self.leaf_page)?;
        Ok(Some(n.get_cell(self.cell_idx)?))
    }

    /// Advances to the next cell in key order, or marks the cursor done.
    pub fn advance(&mut self) -> Result<(), Error> {
        if self.done {
            return Ok(());
        }
        self.cell_idx += 1;
        if self.cell_idx < self.leaf_n_cells {
            return Ok(());
        }
        loop {
            let Some((page, next_idx)) = self.stack.pop() else {
                self.done = true;
                return Ok(());
            };
            let n_cells = self.bt.get_node(page)?.n_cells;
            if next_idx > n_cells {
                continue;
            }
            let child = {
                let n = self.bt.get_node(page)?;
                if next_idx == n_cells {
                    n.right_page
                } else {
                    n.get_cell(next_idx)?.child_page().ok_or_else(|| {
                        err!(CorruptHeader, "internal cell at page {} has no child_page", page)
                    })?
                }
            };
            if next_idx < n_cells {
                self.stack.push((page, next_idx + 1));
            }
            let mut p = child;
            loop {
                let (page_type, n_cells2, right2) = {
                    let n = self.bt.get_node(p)?;
                    (n.page_type, n.n_cells, n.right_page)
                };
                if page_type.is_leaf() {
                    self.leaf_page = p;
                    self.leaf_n_cells = n_cells2;
                    self.cell_idx = 0;
                    return Ok(());
                }
                let child2 = if n_cells2 == 0 {
                    right2
                } else {
                    self.bt.get_node(p)?.get_cell(0)?.child_page().ok_or_else(|| {
                        err!(CorruptHeader, "internal cell at page {} has no child_page", p)
                    })?
                };
                self.stack.push((p, 1));
                p = child2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::BTreeFile;
    use tempfile::NamedTempFile;

    #[test]
    fn scans_every_row_in_ascending_key_order() {
        let tmp = NamedTempFile::new().unwrap();
        let mut bt = BTreeFile::open(tmp.path()).unwrap();
        let mut expected = Vec::new();
        for key in 0..500u32 {
            bt.insert_in_table(1, key, format!("row-{key}").as_bytes()).unwrap();
            expected.push(key);
        }

        let mut seen = Vec::new();
        let mut cursor = Cursor::start(&mut bt, 1).unwrap();
        while !cursor.is_done() {
            if let Cell::TableLeaf { key, .. } = cursor.current().unwrap().unwrap() {
                seen.push(key);
            }
            cursor.advance().unwrap();
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn empty_tree_is_immediately_done() {
        let tmp = NamedTempFile::new().unwrap();
        let mut bt = BTreeFile::open(tmp.path()).unwrap();
        let cursor = Cursor::start(&mut bt, 1).unwrap();
        assert!(cursor.is_done());
    }
}
