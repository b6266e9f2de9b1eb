/// Découpe une chaîne en arguments sur un ensemble de délimiteurs.
///
/// Les délimiteurs en tête et en queue sont ignorés, les séquences de
/// délimiteurs comptent pour un seul séparateur. Utilisé pour transformer la
/// ligne de commande du transcodeur (configuration) en `argv` exécutable sans
/// passer par un shell.
pub fn makeargv(s: &str, delimiters: &str) -> Vec<String> {
    s.split(|c| delimiters.contains(c))
        .filter(|tok| !tok.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_makeargv_simple() {
        assert_eq!(makeargv("wavstreamer -o", " "), vec!["wavstreamer", "-o"]);
    }

    #[test]
    fn test_makeargv_collapses_runs() {
        assert_eq!(makeargv("  a\t b  ", " \t"), vec!["a", "b"]);
    }

    #[test]
    fn test_makeargv_empty() {
        assert!(makeargv("", " ").is_empty());
        assert!(makeargv("   ", " ").is_empty());
    }
}
