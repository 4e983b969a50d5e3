use crate::cursor::Cursor;
use crate::transaction::Transaction;

/// Target for batch execution (cursor or transaction).
#[derive(Debug)]
pub enum BatchTarget<'a> {
    Cursor(&'a mut Cursor),
    Transaction(&'a mut Transaction),
}

impl<'a> From<&'a mut Cursor> for BatchTarget<'a> {
    fn from(cursor: &'a mut Cursor) -> Self {
        BatchTarget::Cursor(cursor)
    }
}

impl<'a> From<&'a mut Transaction> for BatchTarget<'a> {
    fn from(tx: &'a mut Transaction) -> Self {
        BatchTarget::Transaction(tx)
    }
}
