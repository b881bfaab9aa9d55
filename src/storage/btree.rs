//! A single physical file holding any number of independently-rooted
//! B-Trees, in the style of SQLite's page format.
//!
//! Two tree flavors share the same four-byte page header shape:
//!
//! - **Table trees**: leaves hold `(key, data)` rows; internal nodes hold
//!   `(key, child_page)` routing cells. Keys are unique.
//! - **Index trees**: leaves hold `(key_idx, key_pk)` pairs pointing at a
//!   row in some table tree; internal nodes additionally carry a
//!   `child_page`. `key_idx` need not be unique — ties are broken by
//!   `key_pk`.
//!
//! Every node starts with a type byte that doubles as a small bitfield:
//! bit 0x08 means leaf, bit 0x02 means index, bits 0x01/0x04 mean table.
//! Page 1 is special: its first 100 bytes are the file header, and its
//! node header starts right after, at offset 100.
use std::path::Path;

use tracing::{debug, warn};

use super::varint;
use crate::err;
use crate::errors::Error;
use crate::pager::{PageGuard, PageNum, Pager, DEFAULT_PAGE_SIZE, FILE_HEADER_SIZE};

pub const PGTYPE_TABLE_INTERNAL: u8 = 0x05;
pub const PGTYPE_TABLE_LEAF: u8 = 0x0D;
pub const PGTYPE_INDEX_INTERNAL: u8 = 0x02;
pub const PGTYPE_INDEX_LEAF: u8 = 0x0A;

const LEAF_BIT: u8 = 0x08;
const INDEX_BIT: u8 = 0x02;
const TABLE_BITS: u8 = 0x01 | 0x04;

/// Offsets within a node header, relative to the header's own start
/// (`header_offset`), not the start of the page.
const PGHEADER_PGTYPE_OFFSET: usize = 0;
const PGHEADER_FREE_OFFSET: usize = 2;
const PGHEADER_NCELLS_OFFSET: usize = 4;
const PGHEADER_CELL_OFFSET: usize = 6;
const PGHEADER_RIGHTPG_OFFSET: usize = 8;

const LEAF_HEADER_SIZE: usize = 8;
const INTERNAL_HEADER_SIZE: usize = 12;

const TABLEINTCELL_CHILD_OFFSET: usize = 0;
const TABLEINTCELL_CHILD_SIZE: usize = 4;
const TABLEINTCELL_KEY_OFFSET: usize = TABLEINTCELL_CHILD_SIZE;

const INDEXINTCELL_KEYIDX_OFFSET: usize = 0;
const INDEXINTCELL_KEYPK_OFFSET: usize = 4;
const INDEXINTCELL_CHILD_OFFSET: usize = 8;
const INDEXINTCELL_SIZE: usize = 12;

const INDEXLEAFCELL_KEYIDX_OFFSET: usize = 0;
const INDEXLEAFCELL_KEYPK_OFFSET: usize = 4;
const INDEXLEAFCELL_SIZE: usize = 8;

/// Which of the four node shapes a page holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    TableInternal,
    TableLeaf,
    IndexInternal,
    IndexLeaf,
}

impl PageType {
    pub fn as_byte(self) -> u8 {
        match self {
            PageType::TableInternal => PGTYPE_TABLE_INTERNAL,
            PageType::TableLeaf => PGTYPE_TABLE_LEAF,
            PageType::IndexInternal => PGTYPE_INDEX_INTERNAL,
            PageType::IndexLeaf => PGTYPE_INDEX_LEAF,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, Error> {
        match b {
            PGTYPE_TABLE_INTERNAL => Ok(PageType::TableInternal),
            PGTYPE_TABLE_LEAF => Ok(PageType::TableLeaf),
            PGTYPE_INDEX_INTERNAL => Ok(PageType::IndexInternal),
            PGTYPE_INDEX_LEAF => Ok(PageType::IndexLeaf),
            other => Err(err!(CorruptHeader, "unknown page type byte 0x{:02x}", other)),
        }
    }

    pub fn is_leaf(self) -> bool {
        self.as_byte() & LEAF_BIT != 0
    }

    pub fn is_internal(self) -> bool {
        !self.is_leaf()
    }

    pub fn is_table(self) -> bool {
        self.as_byte() & TABLE_BITS != 0
    }

    pub fn is_index(self) -> bool {
        self.as_byte() & INDEX_BIT != 0
    }
}

fn header_offset(npage: PageNum) -> usize {
    if npage == 1 {
        FILE_HEADER_SIZE
    } else {
        0
    }
}

fn header_size(t: PageType) -> usize {
    if t.is_internal() {
        INTERNAL_HEADER_SIZE
    } else {
        LEAF_HEADER_SIZE
    }
}

fn read_u16_be(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

fn write_u16_be(buf: &mut [u8], v: u16) {
    buf[0..2].copy_from_slice(&v.to_be_bytes());
}

fn read_u32_be(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn write_u32_be(buf: &mut [u8], v: u32) {
    buf[0..4].copy_from_slice(&v.to_be_bytes());
}

/// A single cell, fully decoded into owned fields. Table-leaf row bytes
/// are opaque to this layer; everything above it (the row/catalog layer)
/// decides what they mean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    TableInternal { key: u32, child_page: PageNum },
    TableLeaf { key: u32, data: Vec<u8> },
    IndexInternal { key_idx: u32, key_pk: u32, child_page: PageNum },
    IndexLeaf { key_idx: u32, key_pk: u32 },
}

impl Cell {
    /// The key used for ordering and routing: `key` for table cells,
    /// `key_idx` for index cells.
    pub fn key(&self) -> u32 {
        match self {
            Cell::TableInternal { key, .. } => *key,
            Cell::TableLeaf { key, .. } => *key,
            Cell::IndexInternal { key_idx, .. } => *key_idx,
            Cell::IndexLeaf { key_idx, .. } => *key_idx,
        }
    }

    pub fn key_pk(&self) -> Option<u32> {
        match self {
            Cell::IndexInternal { key_pk, .. } => Some(*key_pk),
            Cell::IndexLeaf { key_pk, .. } => Some(*key_pk),
            _ => None,
        }
    }

    pub fn child_page(&self) -> Option<PageNum> {
        match self {
            Cell::TableInternal { child_page, .. } => Some(*child_page),
            Cell::IndexInternal { child_page, .. } => Some(*child_page),
            _ => None,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Cell::TableInternal { key, .. } => TABLEINTCELL_CHILD_SIZE + varint::encoded_len(*key),
            Cell::TableLeaf { key, data } => {
                varint::encoded_len(*key) + varint::encoded_len(data.len() as u32) + data.len()
            }
            Cell::IndexInternal { .. } => INDEXINTCELL_SIZE,
            Cell::IndexLeaf { .. } => INDEXLEAFCELL_SIZE,
        }
    }

    fn encode_into(&self, buf: &mut [u8]) {
        match self {
            Cell::TableInternal { key, child_page } => {
                write_u32_be(&mut buf[TABLEINTCELL_CHILD_OFFSET..], *child_page);
                varint::encode(*key, &mut buf[TABLEINTCELL_KEY_OFFSET..]);
            }
            Cell::TableLeaf { key, data } => {
                let n = varint::encode(*key, buf);
                let m = varint::encode(data.len() as u32, &mut buf[n..]);
                buf[n + m..n + m + data.len()].copy_from_slice(data);
            }
            Cell::IndexInternal { key_idx, key_pk, child_page } => {
                write_u32_be(&mut buf[INDEXINTCELL_KEYIDX_OFFSET..], *key_idx);
                write_u32_be(&mut buf[INDEXINTCELL_KEYPK_OFFSET..], *key_pk);
                write_u32_be(&mut buf[INDEXINTCELL_CHILD_OFFSET..], *child_page);
            }
            Cell::IndexLeaf { key_idx, key_pk } => {
                write_u32_be(&mut buf[INDEXLEAFCELL_KEYIDX_OFFSET..], *key_idx);
                write_u32_be(&mut buf[INDEXLEAFCELL_KEYPK_OFFSET..], *key_pk);
            }
        }
    }

    fn decode(page_type: PageType, buf: &[u8]) -> Result<Self, Error> {
        match page_type {
            PageType::TableInternal => {
                let child_page = read_u32_be(&buf[TABLEINTCELL_CHILD_OFFSET..]);
                let (key, _) = varint::decode(&buf[TABLEINTCELL_KEY_OFFSET..])?;
                Ok(Cell::TableInternal { key, child_page })
            }
            PageType::TableLeaf => {
                let (key, n) = varint::decode(buf)?;
                let (data_size, m) = varint::decode(&buf[n..])?;
                let start = n + m;
                let data = buf[start..start + data_size as usize].to_vec();
                Ok(Cell::TableLeaf { key, data })
            }
            PageType::IndexInternal => Ok(Cell::IndexInternal {
                key_idx: read_u32_be(&buf[INDEXINTCELL_KEYIDX_OFFSET..]),
                key_pk: read_u32_be(&buf[INDEXINTCELL_KEYPK_OFFSET..]),
                child_page: read_u32_be(&buf[INDEXINTCELL_CHILD_OFFSET..]),
            }),
            PageType::IndexLeaf => Ok(Cell::IndexLeaf {
                key_idx: read_u32_be(&buf[INDEXLEAFCELL_KEYIDX_OFFSET..]),
                key_pk: read_u32_be(&buf[INDEXLEAFCELL_KEYPK_OFFSET..]),
            }),
        }
    }
}

/// A parsed, pinned view over one page's node header. Reads and writes go
/// straight through to the underlying `PageGuard`; `write_back` is only
/// needed after changing a header field directly (`insert_cell` already
/// calls it).
pub struct Node<'a> {
    guard: PageGuard<'a>,
    page_num: PageNum,
    page_size: u16,
    pub page_type: PageType,
    pub free_offset: u16,
    pub n_cells: u16,
    pub cells_offset: u16,
    pub right_page: PageNum,
}

impl<'a> Node<'a> {
    fn parse(page_num: PageNum, page_size: u16, guard: PageGuard<'a>) -> Result<Self, Error> {
        let off = header_offset(page_num);
        let page_type = PageType::from_byte(guard.data()[off + PGHEADER_PGTYPE_OFFSET])?;
        let free_offset = read_u16_be(&guard.data()[off + PGHEADER_FREE_OFFSET..]);
        let n_cells = read_u16_be(&guard.data()[off + PGHEADER_NCELLS_OFFSET..]);
        let cells_offset = read_u16_be(&guard.data()[off + PGHEADER_CELL_OFFSET..]);
        let right_page = if page_type.is_internal() {
            read_u32_be(&guard.data()[off + PGHEADER_RIGHTPG_OFFSET..])
        } else {
            0
        };
        Ok(Node {
            guard,
            page_num,
            page_size,
            page_type,
            free_offset,
            n_cells,
            cells_offset,
            right_page,
        })
    }

    fn fresh(page_num: PageNum, page_type: PageType, page_size: u16, guard: PageGuard<'a>) -> Self {
        let off = header_offset(page_num);
        Node {
            guard,
            page_num,
            page_size,
            page_type,
            free_offset: (off + header_size(page_type)) as u16,
            n_cells: 0,
            cells_offset: page_size,
            right_page: 0,
        }
    }

    pub fn page_num(&self) -> PageNum {
        self.page_num
    }

    fn cell_offset_array_start(&self) -> usize {
        header_offset(self.page_num) + header_size(self.page_type)
    }

    pub fn free_space(&self) -> u16 {
        self.cells_offset.saturating_sub(self.free_offset)
    }

    /// Resets this node to empty, keeping its page number and type. Used
    /// both to initialize brand new pages and to compact a node after a
    /// split moves part of its cells elsewhere.
    pub fn reset_empty(&mut self) {
        self.n_cells = 0;
        self.cells_offset = self.page_size;
        self.free_offset = (header_offset(self.page_num) + header_size(self.page_type)) as u16;
        self.right_page = 0;
    }

    pub fn get_cell(&self, k: u16) -> Result<Cell, Error> {
        if k >= self.n_cells {
            return Err(err!(CellNo, "cell {} out of range (n_cells={})", k, self.n_cells));
        }
        let slot = self.cell_offset_array_start() + 2 * k as usize;
        let data = self.guard.data();
        let off = read_u16_be(&data[slot..]) as usize;
        Cell::decode(self.page_type, &data[off..])
    }

    /// Inserts `cell` at position `k`, shifting cells `[k, n_cells)` up by
    /// one slot. `0 <= k <= n_cells` is valid; `k == n_cells` appends.
    pub fn insert_cell(&mut self, k: u16, cell: &Cell) -> Result<(), Error> {
        if k > self.n_cells {
            return Err(err!(
                CellNo,
                "insert position {} is past n_cells {}",
                k,
                self.n_cells
            ));
        }
        let sz = cell.encoded_len();
        let needed = sz + 2;
        if (self.free_space() as usize) < needed {
            return Err(err!(
                Oversized,
                "cell of {} bytes does not fit ({} bytes free)",
                sz,
                self.free_space()
            ));
        }
        let new_cells_offset = self.cells_offset as usize - sz;
        {
            let data = self.guard.data_mut();
            cell.encode_into(&mut data[new_cells_offset..new_cells_offset + sz]);
        }
        self.cells_offset = new_cells_offset as u16;

        let array_start = self.cell_offset_array_start();
        {
            let data = self.guard.data_mut();
            let mut i = self.n_cells as usize;
            while i > k as usize {
                let src = array_start + 2 * (i - 1);
                let dst = array_start + 2 * i;
                let (head, tail) = data.split_at_mut(dst);
                tail[0..2].copy_from_slice(&head[src..src + 2]);
                i -= 1;
            }
            write_u16_be(&mut data[array_start + 2 * k as usize..], new_cells_offset as u16);
        }
        self.n_cells += 1;
        self.free_offset += 2;
        Ok(())
    }

    pub fn write_back(&mut self) -> Result<(), Error> {
        let off = header_offset(self.page_num);
        let data = self.guard.data_mut();
        data[off + PGHEADER_PGTYPE_OFFSET] = self.page_type.as_byte();
        data[off + PGHEADER_PGTYPE_OFFSET + 1] = 0;
        write_u16_be(&mut data[off + PGHEADER_FREE_OFFSET..], self.free_offset);
        write_u16_be(&mut data[off + PGHEADER_NCELLS_OFFSET..], self.n_cells);
        write_u16_be(&mut data[off + PGHEADER_CELL_OFFSET..], self.cells_offset);
        if self.page_type.is_internal() {
            write_u32_be(&mut data[off + PGHEADER_RIGHTPG_OFFSET..], self.right_page);
        }
        Ok(())
    }
}

/// Lower-bound binary search: returns `(true, k)` if `keys[k] == target`,
/// otherwise `(false, k)` where `k` is the first index with
/// `keys[k] > target` (or `keys.len()` if none).
pub fn binary_search_keys(keys: &[u32], target: u32) -> (bool, u16) {
    let mut lo = 0usize;
    let mut hi = keys.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if keys[mid] == target {
            return (true, mid as u16);
        } else if keys[mid] < target {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    (false, lo as u16)
}

fn write_default_file_header(buf: &mut [u8], page_size: u16) {
    buf[0..16].copy_from_slice(b"SQLite format 3\0");
    buf[16..18].copy_from_slice(&page_size.to_be_bytes());
    buf[18] = 1;
    buf[19] = 1;
    buf[20] = 0;
    buf[21] = 64;
    buf[22] = 32;
    buf[23] = 32;
    write_u32_be(&mut buf[44..48], 1);
    write_u32_be(&mut buf[48..52], 20000);
    write_u32_be(&mut buf[56..60], 1);
}

fn verify_header(h: &[u8; FILE_HEADER_SIZE]) -> Result<(), Error> {
    let ok = &h[0..16] == b"SQLite format 3\0"
        && h[18] == 1
        && h[19] == 1
        && h[20] == 0
        && h[21] == 64
        && h[22] == 32
        && h[23] == 32
        && read_u32_be(&h[32..36]) == 0
        && read_u32_be(&h[36..40]) == 0
        && read_u32_be(&h[44..48]) == 1
        && read_u32_be(&h[48..52]) == 20000
        && read_u32_be(&h[52..56]) == 0
        && read_u32_be(&h[56..60]) == 1
        && read_u32_be(&h[64..68]) == 0;
    if ok {
        Ok(())
    } else {
        warn!("File header failed validation");
        Err(err!(CorruptHeader, "file header failed validation"))
    }
}

/// One physical file, hosting any number of B-Trees. A fresh file starts
/// with page 1 (an empty table leaf, holding the 100-byte file header
/// ahead of its node header) and page 2, allocated right after it: the
/// catalog's own root, used by `storage::catalog` to map table/index names
/// to root pages (see `CATALOG_ROOT`).
pub const CATALOG_ROOT: PageNum = 2;

pub struct BTreeFile {
    pager: Pager,
}

impl BTreeFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let mut pager = Pager::open(path)?;
        let header = pager.read_header()?;
        let fresh = header.is_none();
        match header {
            Some(h) => {
                verify_header(&h)?;
                let page_size = read_u16_be(&h[16..18]);
                pager.set_page_size(page_size)?;
            }
            None => {
                pager.set_page_size(DEFAULT_PAGE_SIZE)?;
            }
        }
        let mut bt = BTreeFile { pager };
        if fresh {
            let npage = bt.pager.allocate_page()?;
            debug_assert_eq!(npage, 1, "first allocated page must be page 1");
            bt.init_empty_node(1, PageType::TableLeaf)?;
            {
                let mut guard = bt.pager.get(1)?;
                write_default_file_header(guard.data_mut(), bt.pager.page_size());
            }
            let catalog_page = bt.new_node(PageType::TableLeaf)?;
            debug_assert_eq!(catalog_page, CATALOG_ROOT, "catalog must land on page 2");
            bt.pager.flush()?;
        }
        Ok(bt)
    }

    pub fn page_size(&self) -> u16 {
        self.pager.page_size()
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.pager.flush()
    }

    pub fn close(self) -> Result<(), Error> {
        self.pager.close()
    }

    pub fn get_node(&mut self, npage: PageNum) -> Result<Node<'_>, Error> {
        let page_size = self.pager.page_size();
        let guard = self.pager.get(npage)?;
        Node::parse(npage, page_size, guard)
    }

    pub fn init_empty_node(&mut self, npage: PageNum, page_type: PageType) -> Result<(), Error> {
        let page_size = self.pager.page_size();
        let guard = self.pager.get(npage)?;
        let mut node = Node::fresh(npage, page_type, page_size, guard);
        node.write_back()
    }

    pub fn new_node(&mut self, page_type: PageType) -> Result<PageNum, Error> {
        let npage = self.pager.allocate_page()?;
        self.init_empty_node(npage, page_type)?;
        Ok(npage)
    }

    pub fn write_node(&mut self, node: &mut Node) -> Result<(), Error> {
        node.write_back()
    }

    pub fn free_node(&mut self, node: Node) {
        drop(node);
    }

    pub fn get_cell(&mut self, npage: PageNum, k: u16) -> Result<Cell, Error> {
        self.get_node(npage)?.get_cell(k)
    }

    pub fn insert_cell(&mut self, npage: PageNum, k: u16, cell: &Cell) -> Result<(), Error> {
        let mut n = self.get_node(npage)?;
        n.insert_cell(k, cell)?;
        n.write_back()
    }

    /// Looks up `key` in the table tree rooted at `root`.
    pub fn find(&mut self, root: PageNum, key: u32) -> Result<Vec<u8>, Error> {
        self.find_raw(root, root, key)
    }

    /// Looks up `key_idx` in the index tree rooted at `index_root`; a hit
    /// restarts the descent as a table lookup at `table_root` using the
    /// matched `key_pk`.
    pub fn find_via_index(
        &mut self,
        index_root: PageNum,
        table_root: PageNum,
        key_idx: u32,
    ) -> Result<Vec<u8>, Error> {
        self.find_raw(index_root, table_root, key_idx)
    }

    fn find_raw(&mut self, start: PageNum, table_root: PageNum, key: u32) -> Result<Vec<u8>, Error> {
        let mut page_num = start;
        let mut search_key = key;
        loop {
            let (page_type, n_cells, right_page) = {
                let n = self.get_node(page_num)?;
                (n.page_type, n.n_cells, n.right_page)
            };
            let keys: Vec<u32> = {
                let n = self.get_node(page_num)?;
                (0..n_cells)
                    .map(|k| n.get_cell(k).map(|c| c.key()))
                    .collect::<Result<_, _>>()?
            };
            let (found, k) = binary_search_keys(&keys, search_key);

            match page_type {
                PageType::TableLeaf => {
                    if found {
                        let n = self.get_node(page_num)?;
                        return match n.get_cell(k)? {
                            Cell::TableLeaf { data, .. } => Ok(data),
                            other => Err(err!(
                                CorruptHeader,
                                "table-leaf page {} held a non-table-leaf cell {:?}",
                                page_num,
                                other
                            )),
                        };
                    }
                    return Err(err!(NotFound, "key {} not found", search_key));
                }
                PageType::IndexLeaf => {
                    if found {
                        let n = self.get_node(page_num)?;
                        let pk = n.get_cell(k)?.key_pk().ok_or_else(|| {
                            err!(CorruptHeader, "index-leaf cell at page {} has no key_pk", page_num)
                        })?;
                        search_key = pk;
                        page_num = table_root;
                        continue;
                    }
                    return Err(err!(NotFound, "key_idx {} not found", search_key));
                }
                PageType::IndexInternal if found => {
                    let n = self.get_node(page_num)?;
                    let pk = n.get_cell(k)?.key_pk().ok_or_else(|| {
                        err!(CorruptHeader, "index-internal cell at page {} has no key_pk", page_num)
                    })?;
                    search_key = pk;
                    page_num = table_root;
                    continue;
                }
                PageType::TableInternal | PageType::IndexInternal => {
                    page_num = if k == n_cells {
                        right_page
                    } else {
                        let n = self.get_node(page_num)?;
                        n.get_cell(k)?.child_page().ok_or_else(|| {
                            err!(CorruptHeader, "internal cell at page {} has no child_page", page_num)
                        })?
                    };
                }
            }
        }
    }

    pub fn insert_in_table(&mut self, root: PageNum, key: u32, data: &[u8]) -> Result<(), Error> {
        self.insert(root, Cell::TableLeaf { key, data: data.to_vec() })
    }

    pub fn insert_in_index(&mut self, root: PageNum, key_idx: u32, key_pk: u32) -> Result<(), Error> {
        self.insert(root, Cell::IndexLeaf { key_idx, key_pk })
    }

    fn insert(&mut self, root: PageNum, cell: Cell) -> Result<(), Error> {
        let (root_type, must_split_root) = {
            let n = self.get_node(root)?;
            (n.page_type, (n.free_space() as usize) < cell.encoded_len() + 2)
        };
        if must_split_root {
            debug!(root, "Root node is full, creating a new root");
            let new_page = self.new_node(root_type)?;
            {
                let (n_cells, right_page) = {
                    let r = self.get_node(root)?;
                    (r.n_cells, r.right_page)
                };
                let cells: Vec<Cell> = {
                    let r = self.get_node(root)?;
                    (0..n_cells).map(|k| r.get_cell(k)).collect::<Result<_, _>>()?
                };
                let mut nn = self.get_node(new_page)?;
                for (i, c) in cells.iter().enumerate() {
                    nn.insert_cell(i as u16, c)?;
                }
                nn.right_page = right_page;
                nn.write_back()?;
            }
            let internal_type = if root_type.is_table() {
                PageType::TableInternal
            } else {
                PageType::IndexInternal
            };
            {
                let mut r = self.get_node(root)?;
                r.page_type = internal_type;
                r.reset_empty();
                r.right_page = new_page;
                r.write_back()?;
            }
            debug!(root, right_child_page = new_page, "Creating a new root");
            self.split(root, new_page, 0)?;
        }
        self.insert_non_full(root, cell)
    }

    /// Iterative descent with proactive splitting: before stepping into a
    /// child, split it if it has no room left for `cell`.
    fn insert_non_full(&mut self, root: PageNum, cell: Cell) -> Result<(), Error> {
        let mut page_num = root;
        loop {
            let (page_type, n_cells) = {
                let n = self.get_node(page_num)?;
                (n.page_type, n.n_cells)
            };

            if page_type.is_leaf() {
                let (found, k) = if page_type == PageType::IndexLeaf {
                    let key_pk = cell
                        .key_pk()
                        .ok_or_else(|| err!(CorruptHeader, "index-leaf insert cell has no key_pk"))?;
                    self.index_leaf_insert_pos(page_num, cell.key(), key_pk)?
                } else {
                    let keys: Vec<u32> = {
                        let n = self.get_node(page_num)?;
                        (0..n_cells).map(|k| n.get_cell(k).map(|c| c.key())).collect::<Result<_, _>>()?
                    };
                    binary_search_keys(&keys, cell.key())
                };
                if found {
                    return Err(err!(Duplicate, "key {} already present", cell.key()));
                }
                let mut n = self.get_node(page_num)?;
                n.insert_cell(k, &cell)?;
                n.write_back()?;
                return Ok(());
            }

            let keys: Vec<u32> = {
                let n = self.get_node(page_num)?;
                (0..n_cells).map(|k| n.get_cell(k).map(|c| c.key())).collect::<Result<_, _>>()?
            };
            let (_, k) = binary_search_keys(&keys, cell.key());
            let target_child = {
                let n = self.get_node(page_num)?;
                if k == n.n_cells {
                    n.right_page
                } else {
                    n.get_cell(k)?.child_page().ok_or_else(|| {
                        err!(CorruptHeader, "internal cell at page {} has no child_page", page_num)
                    })?
                }
            };

            let child_has_room = {
                let c = self.get_node(target_child)?;
                (c.free_space() as usize) >= cell.encoded_len() + 2
            };
            if !child_has_room {
                self.split(page_num, target_child, k)?;
                let keys2: Vec<u32> = {
                    let n = self.get_node(page_num)?;
                    (0..n.n_cells)
                        .map(|kk| n.get_cell(kk).map(|c| c.key()))
                        .collect::<Result<_, _>>()?
                };
                let (_, k2) = binary_search_keys(&keys2, cell.key());
                let n2 = self.get_node(page_num)?;
                page_num = if k2 == n2.n_cells {
                    n2.right_page
                } else {
                    n2.get_cell(k2)?.child_page().ok_or_else(|| {
                        err!(CorruptHeader, "internal cell at page {} has no child_page", page_num)
                    })?
                };
            } else {
                page_num = target_child;
            }
        }
    }

    /// Composite `(key_idx, key_pk)` search within an index leaf: secondary
    /// keys need not be unique, so ties are broken by the primary key and
    /// `EDUPLICATE` only fires when both match exactly.
    fn index_leaf_insert_pos(&mut self, page_num: PageNum, key_idx: u32, key_pk: u32) -> Result<(bool, u16), Error> {
        let n = self.get_node(page_num)?;
        let mut lo = 0u16;
        let mut hi = n.n_cells;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let cell = n.get_cell(mid)?;
            let mk = cell.key();
            let mpk = cell
                .key_pk()
                .ok_or_else(|| err!(CorruptHeader, "index-leaf cell at page {} has no key_pk", page_num))?;
            if mk == key_idx && mpk == key_pk {
                return Ok((true, mid));
            } else if (mk, mpk) < (key_idx, key_pk) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok((false, lo))
    }

    /// Splits `child_page` (a child of `parent_page` reached through
    /// routing slot `k_parent`) in two, inserting a new routing cell into
    /// the parent and returning the freshly allocated sibling page.
    fn split(&mut self, parent_page: PageNum, child_page: PageNum, k_parent: u16) -> Result<PageNum, Error> {
        let (child_type, n_cells) = {
            let n = self.get_node(child_page)?;
            (n.page_type, n.n_cells)
        };
        if n_cells == 0 {
            warn!(child_page, "Refusing to split an empty node");
            return Err(err!(Empty, "cannot split empty node (page {})", child_page));
        }
        debug!(parent_page, child_page, n_cells, "Splitting node");
        let m = n_cells / 2;
        let all_cells: Vec<Cell> = {
            let n = self.get_node(child_page)?;
            (0..n_cells).map(|k| n.get_cell(k)).collect::<Result<_, _>>()?
        };
        let is_leaf = child_type.is_leaf();
        // Leaves carry payload, so the median cell stays with the lower
        // half; internal nodes only route, so the median is consumed as
        // the new routing cell and its child pointer becomes the new
        // sibling's right_page.
        let lower_end: u16 = if is_leaf { m + 1 } else { m };

        let new_page = self.new_node(child_type)?;
        {
            let mut nn = self.get_node(new_page)?;
            for i in 0..lower_end {
                nn.insert_cell(i, &all_cells[i as usize])?;
            }
            if !is_leaf {
                nn.right_page = all_cells[m as usize].child_page().ok_or_else(|| {
                    err!(CorruptHeader, "median cell of internal page {} has no child_page", child_page)
                })?;
            }
            nn.write_back()?;
        }

        let retained = &all_cells[(m as usize + 1)..];
        {
            let mut c = self.get_node(child_page)?;
            let keep_right = c.right_page;
            c.reset_empty();
            c.right_page = keep_right;
            for (i, cell) in retained.iter().enumerate() {
                c.insert_cell(i as u16, cell)?;
            }
            c.write_back()?;
        }

        let median = &all_cells[m as usize];
        let routing = if child_type.is_table() {
            Cell::TableInternal { key: median.key(), child_page: new_page }
        } else {
            Cell::IndexInternal {
                key_idx: median.key(),
                key_pk: median.key_pk().ok_or_else(|| {
                    err!(CorruptHeader, "median cell of index page {} has no key_pk", child_page)
                })?,
                child_page: new_page,
            }
        };
        {
            let mut p = self.get_node(parent_page)?;
            p.insert_cell(k_parent, &routing)?;
            p.write_back()?;
        }
        Ok(new_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn open_fresh() -> (NamedTempFile, BTreeFile) {
        let tmp = NamedTempFile::new().unwrap();
        let bt = BTreeFile::open(tmp.path()).unwrap();
        (tmp, bt)
    }

    #[test]
    fn fresh_file_has_an_empty_table_leaf_root() {
        let (_tmp, mut bt) = open_fresh();
        let n = bt.get_node(1).unwrap();
        assert_eq!(n.page_type, PageType::TableLeaf);
        assert_eq!(n.n_cells, 0);
    }

    #[test]
    fn insert_and_find_a_single_row() {
        let (_tmp, mut bt) = open_fresh();
        bt.insert_in_table(1, 7, b"hello").unwrap();
        let data = bt.find(1, 7).unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn find_missing_key_is_not_found() {
        let (_tmp, mut bt) = open_fresh();
        bt.insert_in_table(1, 1, b"x").unwrap();
        assert!(bt.find(1, 2).is_err());
    }

    #[test]
    fn duplicate_table_key_is_rejected() {
        let (_tmp, mut bt) = open_fresh();
        bt.insert_in_table(1, 1, b"x").unwrap();
        assert!(bt.insert_in_table(1, 1, b"y").is_err());
    }

    #[test]
    fn many_inserts_force_a_split_and_stay_findable() {
        let (_tmp, mut bt) = open_fresh();
        for key in 0..2000u32 {
            bt.insert_in_table(1, key, format!("row-{key}").as_bytes()).unwrap();
        }
        for key in [0u32, 999, 1999] {
            let data = bt.find(1, key).unwrap();
            assert_eq!(data, format!("row-{key}").as_bytes());
        }
        let root_type = bt.get_node(1).unwrap().page_type;
        assert_eq!(root_type, PageType::TableInternal);
    }

    #[test]
    fn index_tree_redirects_through_the_table_root() {
        let (_tmp, mut bt) = open_fresh();
        let table_root = 1;
        let index_root = bt.new_node(PageType::IndexLeaf).unwrap();
        bt.insert_in_table(table_root, 100, b"row").unwrap();
        bt.insert_in_index(index_root, 10, 100).unwrap();
        let data = bt.find_via_index(index_root, table_root, 10).unwrap();
        assert_eq!(data, b"row");
    }

    #[test]
    fn index_allows_repeated_secondary_keys_with_distinct_primary_keys() {
        let (_tmp, mut bt) = open_fresh();
        let index_root = bt.new_node(PageType::IndexLeaf).unwrap();
        bt.insert_in_index(index_root, 10, 1).unwrap();
        bt.insert_in_index(index_root, 10, 2).unwrap();
        assert!(bt.insert_in_index(index_root, 10, 1).is_err());
    }

    #[test]
    fn binary_search_reports_insertion_point_on_miss() {
        let (found, k) = binary_search_keys(&[1, 3, 5, 7], 4);
        assert!(!found);
        assert_eq!(k, 2);
        let (found, k) = binary_search_keys(&[1, 3, 5, 7], 5);
        assert!(found);
        assert_eq!(k, 2);
    }
}
