use crate::common::{PageId, PAGE_SIZE};

// Header page layout:
//   record_count: u32
//   records: [name: 32 bytes, zero padded | root_page_id: u32] * record_count
const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

/// Maximum number of index records the header page can hold.
pub const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// Read-only view over the header page, which lives at page 0 and maps
/// index names to their root page ids.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        let bytes: [u8; 4] = self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .try_into()
            .unwrap();
        u32::from_le_bytes(bytes) as usize
    }

    /// Returns the root page id recorded for `name`, if any.
    pub fn root_page_id(&self, name: &str) -> Option<PageId> {
        find_record(self.data, name).map(|i| record_root(self.data, i))
    }
}

/// Mutable view over the header page.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        HeaderPageRef::new(self.data).record_count()
    }

    pub fn root_page_id(&self, name: &str) -> Option<PageId> {
        find_record(self.data, name).map(|i| record_root(self.data, i))
    }

    /// Appends a new (name, root page id) record.
    /// Returns false if the name is too long, already present, or the page
    /// is full.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        if name.len() > NAME_SIZE || name.is_empty() {
            return false;
        }
        if find_record(self.data, name).is_some() {
            return false;
        }
        let count = self.record_count();
        if count >= MAX_HEADER_RECORDS {
            return false;
        }

        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        self.data[offset..offset + NAME_SIZE].fill(0);
        self.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
            .copy_from_slice(&root_page_id.as_u32().to_le_bytes());

        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&((count + 1) as u32).to_le_bytes());
        true
    }

    /// Overwrites the root page id of an existing record.
    /// Returns false if no record with this name exists.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        match find_record(self.data, name) {
            Some(i) => {
                let offset = RECORDS_OFFSET + i * RECORD_SIZE + NAME_SIZE;
                self.data[offset..offset + 4]
                    .copy_from_slice(&root_page_id.as_u32().to_le_bytes());
                true
            }
            None => false,
        }
    }
}

fn find_record(data: &[u8], name: &str) -> Option<usize> {
    if name.len() > NAME_SIZE {
        return None;
    }
    let count = {
        let bytes: [u8; 4] = data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .try_into()
            .unwrap();
        u32::from_le_bytes(bytes) as usize
    };
    (0..count.min(MAX_HEADER_RECORDS)).find(|&i| {
        let offset = RECORDS_OFFSET + i * RECORD_SIZE;
        let stored = &data[offset..offset + NAME_SIZE];
        let trimmed = &stored[..stored.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE)];
        trimmed == name.as_bytes()
    })
}

fn record_root(data: &[u8], index: usize) -> PageId {
    let offset = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
    let bytes: [u8; 4] = data[offset..offset + 4].try_into().unwrap();
    PageId::new(u32::from_le_bytes(bytes))
}
