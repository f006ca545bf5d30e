//! Heuristic challenge grading. The checks are keyed off the challenge
//! title and only look for the expected shapes in the submitted code; they
//! are deliberately shallow (no execution sandbox).

pub fn evaluate(challenge_title: &str, code: &str) -> bool {
    let title = challenge_title.to_lowercase();
    let code = code.to_lowercase();
    let code = code.trim();

    if title.contains("hello") {
        code.contains("hello") && code.contains("world")
    } else if title.contains("sum") {
        code.contains("return") && (code.contains("a + b") || code.contains("a+b"))
    } else if title.contains("maximum") || title.contains("max") {
        code.contains("max(") || code.contains("maximum")
    } else if title.contains("vowel") {
        code.contains("vowel") && (code.contains("count") || code.contains("sum"))
    } else if title.contains("fibonacci") {
        code.contains("fibonacci") || (code.contains("fib") && code.contains("append"))
    } else if title.contains("palindrome") {
        code.contains("palindrome") || code.contains("::-1") || code.contains("reverse")
    } else {
        // No specific rule: accept anything non-trivial
        code.len() > 10
    }
}

#[cfg(test)]
mod tests {
    use super::evaluate;

    #[test]
    fn hello_world_requires_both_words() {
        assert!(evaluate("Hello World", "print('Hello, World!')"));
        assert!(!evaluate("Hello World", "print('Hi there')"));
    }

    #[test]
    fn sum_requires_return_of_a_plus_b() {
        assert!(evaluate("Sum of Two Numbers", "def f(a, b):\n    return a + b"));
        assert!(evaluate("Sum of Two Numbers", "def f(a, b):\n    return a+b"));
        assert!(!evaluate("Sum of Two Numbers", "print(a + b)"));
    }

    #[test]
    fn unknown_title_accepts_non_trivial_code() {
        assert!(evaluate("Mystery Task", "some longer submission text"));
        assert!(!evaluate("Mystery Task", "x"));
    }

    #[test]
    fn palindrome_accepts_reverse_idiom() {
        assert!(evaluate("Palindrome Check", "s == s[::-1]"));
        assert!(!evaluate("Palindrome Check", "todo"));
    }
}
