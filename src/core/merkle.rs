use crate::utils::sha256_hex;

/// Merkle root over a block's transaction ids
///
/// Leaves are the lowercase hex ids themselves. Each level hashes the concatenation of
/// adjacent hex strings, and an odd level duplicates its last element before pairing.
/// A single id is its own root and an empty list has the empty root.
pub fn merkle_root<S: AsRef<str>>(ids: &[S]) -> String {
    let mut level: Vec<String> = ids.iter().map(|id| id.as_ref().to_string()).collect();

    while level.len() > 1 {
        if level.len() % 2 != 0 {
            if let Some(last) = level.last().cloned() {
                level.push(last);
            }
        }
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }

    level.pop().unwrap_or_default()
}

fn hash_pair(left: &str, right: &str) -> String {
    sha256_hex(&format!("{left}{right}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_root() {
        let ids: [&str; 0] = [];
        assert_eq!(merkle_root(&ids), "");
    }

    #[test]
    fn test_single_id_is_its_own_root() {
        assert_eq!(merkle_root(&["deadbeef"]), "deadbeef");
    }

    #[test]
    fn test_pair() {
        assert_eq!(merkle_root(&["a", "b"]), sha256_hex("ab"));
    }

    #[test]
    fn test_odd_level_duplicates_last() {
        assert_eq!(
            merkle_root(&["a", "b", "c"]),
            "5c700ad7ee9dc104f1a6e92da5a3a76f73d62b0d1c86a205eace21ed914dcdbf"
        );
        let ab = sha256_hex("ab");
        let cc = sha256_hex("cc");
        assert_eq!(merkle_root(&["a", "b", "c"]), sha256_hex(&format!("{ab}{cc}")));
    }

    #[test]
    fn test_four_leaves() {
        assert_eq!(
            merkle_root(&["a", "b", "c", "d"]),
            "12a40550c10c6339bf6f271445270e49b844d6c9e8abc36b9b642be532befe94"
        );
    }

    #[test]
    fn test_order_matters() {
        assert_ne!(merkle_root(&["a", "b"]), merkle_root(&["b", "a"]));
    }
}
