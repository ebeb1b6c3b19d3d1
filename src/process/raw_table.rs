/// One landed spreadsheet row. Its meaning depends on the rows around it:
/// a `"ZIP NAME"` region opens a district, a dated region is a reading for
/// the most recently opened district.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub region: String,
    /// `None` on header rows (empty cell).
    pub men: Option<String>,
    pub women: Option<String>,
}

impl RawRecord {
    pub fn new(region: impl Into<String>, men: Option<&str>, women: Option<&str>) -> Self {
        Self {
            region: region.into(),
            men: men.map(str::to_string),
            women: women.map(str::to_string),
        }
    }

    /// Build from positional CSV fields; blank cells become `None`.
    pub fn from_fields<'a, I>(fields: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut it = fields.into_iter();
        let region = it.next().unwrap_or_default().trim().to_string();
        let mut cell = || {
            it.next()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let men = cell();
        let women = cell();
        Self { region, men, women }
    }
}
