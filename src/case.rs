//! Name normalisation for model and relation names: relation path segments arrive as
//! `car-parts`, `carParts`, `CarParts` or `car_part` and must all find the same relation.

/// Convert an identifier to snake_case.
/// e.g. "firstName" -> "first_name", "Car-Parts" -> "car_parts", "car parts" -> "car_parts"
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_lower = false;
    for c in s.chars() {
        if c == '-' || c == ' ' || c == '_' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        } else if c.is_uppercase() {
            if prev_lower && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

const IRREGULAR: &[(&str, &str)] = &[
    ("people", "person"),
    ("children", "child"),
    ("men", "man"),
    ("women", "woman"),
    ("mice", "mouse"),
    ("geese", "goose"),
    ("feet", "foot"),
    ("teeth", "tooth"),
];

/// Singular form of a lowercase English noun: a few irregular words plus the regular endings.
pub fn singularize(word: &str) -> String {
    let word = word.to_lowercase();
    if let Some((_, singular)) = IRREGULAR.iter().find(|(plural, _)| *plural == word) {
        return singular.to_string();
    }
    for stem in ["status", "alias", "bus"] {
        if word.strip_suffix("es").is_some_and(|w| w.ends_with(stem)) {
            return word[..word.len() - 2].to_string();
        }
    }
    if let Some(stem) = word.strip_suffix("ies").filter(|s| !s.is_empty()) {
        return format!("{}y", stem);
    }
    for suffix in ["sses", "shes", "ches", "xes", "zes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.len() > 1 && word.ends_with('s') && !word.ends_with("ss") && !word.ends_with("us") {
        return word[..word.len() - 1].to_string();
    }
    word
}

/// Key used to compare relation names: snake_case with the last word singular.
pub fn relation_key(name: &str) -> String {
    let snake = to_snake_case(name);
    match snake.rsplit_once('_') {
        Some((head, last)) => format!("{}_{}", head, singularize(last)),
        None => singularize(&snake),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_variants() {
        assert_eq!(to_snake_case("firstName"), "first_name");
        assert_eq!(to_snake_case("CarParts"), "car_parts");
        assert_eq!(to_snake_case("car-parts"), "car_parts");
        assert_eq!(to_snake_case("Car Parts"), "car_parts");
        assert_eq!(to_snake_case("user_id"), "user_id");
        assert_eq!(to_snake_case("Users"), "users");
    }

    #[test]
    fn singular_forms() {
        assert_eq!(singularize("cars"), "car");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("addresses"), "address");
        assert_eq!(singularize("status"), "status");
        assert_eq!(singularize("car"), "car");
        assert_eq!(singularize("statuses"), "status");
        assert_eq!(singularize("aliases"), "alias");
        assert_eq!(singularize("houses"), "house");
    }

    #[test]
    fn irregular_plurals() {
        assert_eq!(singularize("people"), "person");
        assert_eq!(singularize("Children"), "child");
        assert_eq!(singularize("teeth"), "tooth");
        assert_eq!(singularize("person"), "person");
        assert_eq!(relation_key("order_statuses"), relation_key("orderStatus"));
        assert_eq!(relation_key("club_people"), "club_person");
    }

    #[test]
    fn relation_keys_agree_across_spellings() {
        let key = relation_key("car_parts");
        assert_eq!(relation_key("car-parts"), key);
        assert_eq!(relation_key("CarParts"), key);
        assert_eq!(relation_key("carPart"), key);
        assert_eq!(key, "car_part");
    }
}
