use sha2::{Digest, Sha256};

use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::types::{AttributeRow, Value};

/// Derives a hash key from the named attributes of `row`.
///
/// The canonical string forms of the attributes are concatenated in the given order without
/// a delimiter and hashed with SHA-256. The result is the lowercase hexadecimal digest,
/// 64 characters long. Nulls are rejected since they have no canonical form.
pub fn derive_hash<S>(row: &AttributeRow, attributes: &[S]) -> LoadResult<String>
where
    S: AsRef<str>,
{
    if attributes.is_empty() {
        bail!(
            ErrorKind::InvalidData,
            "Hash key needs at least one attribute"
        );
    }

    let mut hasher = Sha256::new();
    for attribute in attributes {
        let attribute = attribute.as_ref();
        let Some(canonical) = row.require(attribute)?.canonical_string() else {
            bail!(
                ErrorKind::InvalidData,
                "Null attribute cannot be part of a hash key",
                format!("attribute '{attribute}' is null in {row}")
            );
        };

        hasher.update(canonical.as_bytes());
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Derives a hash key like [`derive_hash`] and stores it in `row` as `target`.
pub fn derive_hash_into<S>(row: &mut AttributeRow, target: &str, attributes: &[S]) -> LoadResult<String>
where
    S: AsRef<str>,
{
    let hash = derive_hash(row, attributes)?;
    row.set(target, Value::String(hash.clone()));

    Ok(hash)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn book_row() -> AttributeRow {
        AttributeRow::new()
            .with("title", "Dune")
            .with("genre", "SciFi")
            .with("date", NaiveDate::from_ymd_opt(2023, 11, 7).unwrap())
    }

    #[test]
    fn hash_matches_known_digest() {
        let hash = derive_hash(&book_row(), &["title", "genre"]).unwrap();

        assert_eq!(
            hash,
            "0e3a9c4d544d45c01bea9df2ef6d86f3f2b5ba89b307156a72b4b676c29109ce"
        );
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn dates_hash_in_iso_form() {
        let hash = derive_hash(&book_row(), &["date"]).unwrap();

        assert_eq!(
            hash,
            "81ff62c9c17a4cf8a0dbb09b7b491b0acb9efe086b978e0de81bcfc10877436a"
        );
    }

    #[test]
    fn hash_is_stable_and_order_sensitive() {
        let row = book_row();

        assert_eq!(
            derive_hash(&row, &["title", "genre"]).unwrap(),
            derive_hash(&row.clone(), &["title", "genre"]).unwrap()
        );
        assert_ne!(
            derive_hash(&row, &["title", "genre"]).unwrap(),
            derive_hash(&row, &["genre", "title"]).unwrap()
        );
    }

    #[test]
    fn missing_and_null_attributes_are_rejected() {
        let row = book_row().with("subtitle", Value::Null);

        assert_eq!(
            derive_hash(&row, &["isbn"]).unwrap_err().kind(),
            ErrorKind::MissingAttribute
        );
        assert_eq!(
            derive_hash(&row, &["title", "subtitle"]).unwrap_err().kind(),
            ErrorKind::InvalidData
        );
    }

    #[test]
    fn derive_hash_into_stores_the_key() {
        let mut row = book_row();
        let hash = derive_hash_into(&mut row, "book_hash_id", &["title", "genre"]).unwrap();

        assert_eq!(row.get_str("book_hash_id").unwrap(), hash);
    }
}
