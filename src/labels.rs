use std::{collections::HashMap, fmt};

use ndarray::{Array1, Array2};

use crate::{Error, Result};

/// Latin letters with the visually ambiguous lowercase/uppercase pairs
/// (c/C, k/K, o/O, p/P, s/S, u/U, v/V, w/W, x/X, y/Y, z/Z) merged.
pub const DEFAULT_ALPHABET: &str = "AaBbCDdEeFfGgHhIiJjKLlMmNnOPQqRrSTtUVWXYZ";

/// Ground truth of one box: a character or the non-character sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Char(char),
    NonChar,
}

impl Label {
    /// A string holding exactly one character becomes that character,
    /// anything else the sentinel.
    pub fn parse(text: &str) -> Self {
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::Char(c),
            _ => Self::NonChar,
        }
    }

    pub fn as_char(&self) -> Option<char> {
        match self {
            Self::Char(c) => Some(*c),
            Self::NonChar => None,
        }
    }

    pub fn is_char(&self) -> bool {
        matches!(self, Self::Char(_))
    }
}

impl From<char> for Label {
    fn from(c: char) -> Self {
        Self::Char(c)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Char(c) => write!(f, "{c}"),
            Self::NonChar => write!(f, "<nonchar>"),
        }
    }
}

/// Encoded labels, either one class index per label or one-hot rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoded {
    Indices(Array1<i64>),
    OneHot(Array2<f32>),
}

/// Fixed character set with one extra class for the sentinel.
#[derive(Debug, Clone)]
pub struct Alphabet {
    symbols: Vec<char>,
    index: HashMap<char, usize>,
}

impl Alphabet {
    pub fn new(symbols: impl IntoIterator<Item = char>) -> Result<Self> {
        let symbols = symbols.into_iter().collect::<Vec<_>>();
        if symbols.is_empty() {
            return Err(Error::config("alphabet is empty"));
        }
        let mut index = HashMap::with_capacity(symbols.len());
        for (i, c) in symbols.iter().enumerate() {
            if index.insert(*c, i).is_some() {
                return Err(Error::config(format!("alphabet repeats {c:?}")));
            }
        }
        Ok(Self { symbols, index })
    }

    pub fn symbols(&self) -> &[char] {
        &self.symbols
    }

    /// Number of classes including the sentinel.
    pub fn num_classes(&self) -> usize {
        self.symbols.len() + 1
    }

    pub fn nonchar_index(&self) -> usize {
        self.symbols.len()
    }

    /// Maps a label onto the alphabet: the character itself, else its
    /// case-swapped form, else the sentinel.
    pub fn resolve(&self, label: Label) -> Label {
        let Label::Char(c) = label else {
            return Label::NonChar;
        };
        if self.index.contains_key(&c) {
            return label;
        }
        match swap_case(c) {
            Some(swapped) if self.index.contains_key(&swapped) => Label::Char(swapped),
            _ => Label::NonChar,
        }
    }

    pub fn index_of(&self, label: Label) -> usize {
        match self.resolve(label) {
            Label::Char(c) => self.index.get(&c).copied().unwrap_or(self.nonchar_index()),
            Label::NonChar => self.nonchar_index(),
        }
    }

    pub fn decode(&self, index: usize) -> Option<Label> {
        match index {
            i if i < self.symbols.len() => Some(Label::Char(self.symbols[i])),
            i if i == self.nonchar_index() => Some(Label::NonChar),
            _ => None,
        }
    }

    pub fn encode(&self, labels: &[Label], to_one_hot: bool) -> Encoded {
        if to_one_hot {
            Encoded::OneHot(self.encode_one_hot(labels))
        } else {
            Encoded::Indices(self.encode_indices(labels))
        }
    }

    pub fn encode_indices(&self, labels: &[Label]) -> Array1<i64> {
        labels
            .iter()
            .map(|label| self.index_of(*label) as i64)
            .collect()
    }

    pub fn encode_one_hot(&self, labels: &[Label]) -> Array2<f32> {
        let mut one_hot = Array2::zeros((labels.len(), self.num_classes()));
        for (row, label) in labels.iter().enumerate() {
            one_hot[[row, self.index_of(*label)]] = 1.0;
        }
        one_hot
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        let symbols = DEFAULT_ALPHABET.chars().collect::<Vec<_>>();
        let index = symbols.iter().enumerate().map(|(i, c)| (*c, i)).collect();
        Self { symbols, index }
    }
}

/// The other case of `c`, when that is a single character.
fn swap_case(c: char) -> Option<char> {
    let swapped = if c.is_lowercase() {
        c.to_uppercase().collect::<String>()
    } else if c.is_uppercase() {
        c.to_lowercase().collect::<String>()
    } else {
        return None;
    };
    let mut chars = swapped.chars();
    match (chars.next(), chars.next()) {
        (Some(s), None) => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn default_alphabet_has_41_symbols_plus_sentinel() {
        let alphabet = Alphabet::default();
        assert_eq!(alphabet.symbols().len(), 41);
        assert_eq!(alphabet.num_classes(), 42);
        assert_eq!(alphabet.index_of(Label::Char('A')), 0);
        assert_eq!(alphabet.index_of(Label::NonChar), 41);
    }

    #[test]
    fn encoding_round_trips_up_to_case() {
        let alphabet = Alphabet::default();
        for c in ('a'..='z').chain('A'..='Z') {
            let decoded = alphabet.decode(alphabet.index_of(c.into())).unwrap();
            let swapped = swap_case(c).map(Label::Char);
            assert!(decoded == Label::Char(c) || Some(decoded) == swapped, "{c}");
        }
    }

    #[test]
    fn swaps_single_character_case_only() {
        assert_eq!(swap_case('q'), Some('Q'));
        assert_eq!(swap_case('K'), Some('k'));
        assert_eq!(swap_case('7'), None);
        // 'ß' upper-cases to "SS"
        assert_eq!(swap_case('ß'), None);
    }

    #[test]
    fn falls_back_to_swapped_case() {
        let alphabet = Alphabet::default();
        assert_eq!(alphabet.resolve(Label::Char('c')), Label::Char('C'));
        assert_eq!(alphabet.resolve(Label::Char('a')), Label::Char('a'));
    }

    #[test]
    fn unknown_characters_become_sentinel() {
        let alphabet = Alphabet::default();
        for c in ['7', '!', 'é', ' ', '中'] {
            assert_eq!(alphabet.index_of(c.into()), alphabet.nonchar_index());
        }
        assert_eq!(alphabet.index_of(Label::parse("ab")), alphabet.nonchar_index());
        assert_eq!(alphabet.index_of(Label::parse("")), alphabet.nonchar_index());
    }

    #[test]
    fn encodes_indices_and_one_hot() {
        let alphabet = Alphabet::new("ab".chars()).unwrap();
        let labels = [Label::Char('b'), Label::Char('A'), Label::NonChar];
        assert_eq!(
            alphabet.encode(&labels, false),
            Encoded::Indices(array![1, 0, 2])
        );
        assert_eq!(
            alphabet.encode(&labels, true),
            Encoded::OneHot(array![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]])
        );
    }

    #[test]
    fn rejects_invalid_alphabets() {
        assert!(matches!(Alphabet::new("".chars()), Err(Error::Config(_))));
        assert!(matches!(Alphabet::new("abca".chars()), Err(Error::Config(_))));
    }
}
