use crate::application::engine::AccountView;
use crate::error::Result;
use std::io::Write;

/// Writes account balances as CSV with the header `account,balance,min_balance,usable`.
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new().from_writer(sink),
        }
    }

    pub fn write_accounts(&mut self, accounts: impl IntoIterator<Item = AccountView>) -> Result<()> {
        self.writer
            .write_record(["account", "balance", "min_balance", "usable"])?;
        for view in accounts {
            self.writer.write_record([
                view.account,
                view.balance.to_string(),
                view.min_balance.to_string(),
                view.usable.to_string(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
