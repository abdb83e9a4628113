/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use rusqlite::Row;
use sea_query::Iden;

#[derive(Clone, Copy, Iden)]
pub enum Column {
    #[iden = "object_store"]
    Table,
    Id,
    Name,
    KeyPath,
    AutoIncrement,
    KeyGeneratorCurrent,
}

impl Column {
    /// Every column, in the order `Model` reads them.
    pub const COLUMNS: [Column; 5] = [
        Column::Id,
        Column::Name,
        Column::KeyPath,
        Column::AutoIncrement,
        Column::KeyGeneratorCurrent,
    ];
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Model {
    pub id: i64,
    pub name: String,
    pub key_path: Option<Vec<u8>>,
    pub auto_increment: bool,
    pub key_generator_current: i64,
}

impl TryFrom<&Row<'_>> for Model {
    type Error = rusqlite::Error;

    fn try_from(value: &Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.get(0)?,
            name: value.get(1)?,
            key_path: value.get(2)?,
            auto_increment: value.get(3)?,
            key_generator_current: value.get(4)?,
        })
    }
}
