//! A small R-style model formula language.
//!
//! ```text
//! log(chloride_mg_l) ~ site * time + flow_index + s(doy, k=12, bs=cc)
//! ```
//!
//! Supported terms: plain columns, `log(x)`, `factor(x)`, interactions
//! `a:b`, crossings `a*b` (expanded to `a + b + a:b`) and smooths
//! `s(x, k=.., bs=..)`. The intercept is implicit and always present.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transform {
    Identity,
    Log,
}

/// A column reference with an optional transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub transform: Transform,
    /// Forced factor coding via `factor(x)`.
    pub as_factor: bool,
}

impl Variable {
    pub fn plain(name: &str) -> Self {
        Variable {
            name: name.to_string(),
            transform: Transform::Identity,
            as_factor: false,
        }
    }

    /// Responses on the natural-log scale, either through `log(x)` or a
    /// precomputed `log_*` column.
    pub fn is_log_scale(&self) -> bool {
        self.transform == Transform::Log || self.name.starts_with("log_")
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.transform, self.as_factor) {
            (Transform::Log, _) => write!(f, "log({})", self.name),
            (Transform::Identity, true) => write!(f, "factor({})", self.name),
            (Transform::Identity, false) => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasisKind {
    /// cubic regression spline (`cr`, also accepted for `ps`, `tp`, `bs`)
    Cubic,
    /// cyclic cubic spline (`cc`)
    Cyclic,
    /// random effect (`re`)
    RandomEffect,
}

impl BasisKind {
    fn code(&self) -> &'static str {
        match self {
            BasisKind::Cubic => "cr",
            BasisKind::Cyclic => "cc",
            BasisKind::RandomEffect => "re",
        }
    }
}

pub const DEFAULT_K: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmoothSpec {
    pub var: String,
    pub k: usize,
    pub basis: BasisKind,
}

impl fmt::Display for SmoothSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.basis {
            BasisKind::RandomEffect => write!(f, "s({}, bs=re)", self.var),
            _ => write!(f, "s({}, k={}, bs={})", self.var, self.k, self.basis.code()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    Main(Variable),
    Interaction(Vec<Variable>),
    Smooth(SmoothSpec),
}

impl Term {
    /// Column names the term reads.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Term::Main(v) => vec![v.name.as_str()],
            Term::Interaction(vs) => vs.iter().map(|v| v.name.as_str()).collect(),
            Term::Smooth(s) => vec![s.var.as_str()],
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Main(v) => write!(f, "{}", v),
            Term::Interaction(vs) => {
                let parts: Vec<String> = vs.iter().map(|v| v.to_string()).collect();
                f.write_str(&parts.join(":"))
            }
            Term::Smooth(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    pub response: Variable,
    pub terms: Vec<Term>,
}

impl Formula {
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0 };
        let formula = parser.formula()?;
        if parser.pos != parser.tokens.len() {
            bail!("unexpected {:?} in formula {:?}", parser.tokens[parser.pos], text);
        }
        Ok(formula)
    }

    pub fn has_smooths(&self) -> bool {
        self.terms.iter().any(|t| matches!(t, Term::Smooth(_)))
    }

    /// Every column the formula reads, response first, without repeats.
    pub fn columns(&self) -> Vec<&str> {
        let mut cols = vec![self.response.name.as_str()];
        for term in &self.terms {
            for c in term.columns() {
                if !cols.contains(&c) {
                    cols.push(c);
                }
            }
        }
        cols
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ ", self.response)?;
        if self.terms.is_empty() {
            return f.write_str("1");
        }
        let parts: Vec<String> = self.terms.iter().map(|t| t.to_string()).collect();
        f.write_str(&parts.join(" + "))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Tilde,
    Plus,
    Star,
    Colon,
    LParen,
    RParen,
    Comma,
    Equals,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let single = match c {
            '~' => Some(Token::Tilde),
            '+' => Some(Token::Plus),
            '*' => Some(Token::Star),
            ':' => Some(Token::Colon),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            '=' => Some(Token::Equals),
            _ => None,
        };
        if let Some(tok) = single {
            tokens.push(tok);
            i += 1;
        } else if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            match s.parse::<f64>() {
                Ok(v) => tokens.push(Token::Number(v)),
                Err(_) => bail!("bad number {:?} in formula", s),
            }
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            bail!("unexpected character {:?} in formula", c);
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// One factor of a product term before expansion.
#[derive(Debug, Clone)]
enum Atom {
    Var(Variable),
    Smooth(SmoothSpec),
    Intercept,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, want: Token) -> Result<()> {
        match self.next() {
            Some(tok) if tok == want => Ok(()),
            Some(tok) => bail!("expected {:?}, found {:?}", want, tok),
            None => bail!("expected {:?}, found end of formula", want),
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            Some(tok) => bail!("expected a column name, found {:?}", tok),
            None => bail!("expected a column name, found end of formula"),
        }
    }

    fn formula(&mut self) -> Result<Formula> {
        let response = match self.atom()? {
            Atom::Var(v) => v,
            _ => bail!("response must be a column or log(column)"),
        };
        self.expect(Token::Tilde)?;

        let mut terms: Vec<Term> = Vec::new();
        for term in self.sum()? {
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
        Ok(Formula { response, terms })
    }

    fn sum(&mut self) -> Result<Vec<Term>> {
        let mut terms = self.product()?;
        while self.peek() == Some(&Token::Plus) {
            self.pos += 1;
            terms.extend(self.product()?);
        }
        Ok(terms)
    }

    /// `a*b*c` expands to every non-empty combination of its factors.
    fn product(&mut self) -> Result<Vec<Term>> {
        let mut groups = vec![self.interaction()?];
        while self.peek() == Some(&Token::Star) {
            self.pos += 1;
            groups.push(self.interaction()?);
        }

        let mut terms = Vec::new();
        for mask in 1..(1u32 << groups.len()) {
            let atoms: Vec<Atom> = groups
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .flat_map(|(_, g)| g.iter().cloned())
                .collect();
            if let Some(term) = term_from_atoms(atoms)? {
                terms.push(term);
            }
        }
        terms.sort_by_key(|t| match t {
            Term::Interaction(vs) => vs.len(),
            _ => 1,
        });
        Ok(terms)
    }

    fn interaction(&mut self) -> Result<Vec<Atom>> {
        let mut atoms = vec![self.atom()?];
        while self.peek() == Some(&Token::Colon) {
            self.pos += 1;
            atoms.push(self.atom()?);
        }
        Ok(atoms)
    }

    fn atom(&mut self) -> Result<Atom> {
        match self.next() {
            Some(Token::Number(n)) if n == 1.0 => Ok(Atom::Intercept),
            Some(Token::Ident(name)) => {
                if self.peek() != Some(&Token::LParen) {
                    return Ok(Atom::Var(Variable::plain(&name)));
                }
                self.pos += 1;
                let atom = match name.as_str() {
                    "log" => {
                        let mut v = Variable::plain(&self.ident()?);
                        v.transform = Transform::Log;
                        Atom::Var(v)
                    }
                    "factor" => {
                        let mut v = Variable::plain(&self.ident()?);
                        v.as_factor = true;
                        Atom::Var(v)
                    }
                    "s" => Atom::Smooth(self.smooth_args()?),
                    other => bail!("unknown function {}() in formula", other),
                };
                self.expect(Token::RParen)?;
                Ok(atom)
            }
            Some(tok) => bail!("unexpected {:?} in formula", tok),
            None => bail!("formula ends early"),
        }
    }

    fn smooth_args(&mut self) -> Result<SmoothSpec> {
        let var = self.ident()?;
        let mut spec = SmoothSpec {
            var,
            k: DEFAULT_K,
            basis: BasisKind::Cubic,
        };

        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            let key = self.ident()?;
            self.expect(Token::Equals)?;
            match key.as_str() {
                "k" => match self.next() {
                    Some(Token::Number(n)) if n >= 4.0 && n.fract() == 0.0 => spec.k = n as usize,
                    other => bail!("s({}): k must be an integer >= 4, found {:?}", spec.var, other),
                },
                "bs" => {
                    let code = self.ident()?;
                    spec.basis = match code.as_str() {
                        "cr" | "ps" | "tp" | "bs" => BasisKind::Cubic,
                        "cc" => BasisKind::Cyclic,
                        "re" => BasisKind::RandomEffect,
                        other => bail!("s({}): unsupported basis {:?}", spec.var, other),
                    };
                }
                other => bail!("s({}): unknown argument {:?}", spec.var, other),
            }
        }

        Ok(spec)
    }
}

fn term_from_atoms(atoms: Vec<Atom>) -> Result<Option<Term>> {
    let mut vars = Vec::new();
    let mut smooth = None;
    for atom in atoms {
        match atom {
            Atom::Var(v) => {
                if !vars.contains(&v) {
                    vars.push(v);
                }
            }
            Atom::Smooth(s) => smooth = Some(s),
            Atom::Intercept => {}
        }
    }

    match (smooth, vars.len()) {
        (Some(s), 0) => Ok(Some(Term::Smooth(s))),
        (Some(s), _) => bail!("smooth {} cannot be part of an interaction", s),
        (None, 0) => Ok(None),
        (None, 1) => Ok(vars.pop().map(Term::Main)),
        (None, _) => Ok(Some(Term::Interaction(vars))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_formula() {
        let f = Formula::parse("do_mg_l ~ site + flow_index").unwrap();
        assert_eq!(f.response, Variable::plain("do_mg_l"));
        assert_eq!(
            f.terms,
            vec![
                Term::Main(Variable::plain("site")),
                Term::Main(Variable::plain("flow_index")),
            ]
        );
        assert!(!f.has_smooths());
    }

    #[test]
    fn test_parse_log_response_and_factor() {
        let f = Formula::parse("log(chloride_mg_l) ~ factor(year)").unwrap();
        assert_eq!(f.response.transform, Transform::Log);
        assert!(f.response.is_log_scale());
        match &f.terms[0] {
            Term::Main(v) => assert!(v.as_factor),
            other => panic!("unexpected term {:?}", other),
        }
    }

    #[test]
    fn test_star_expands_to_mains_and_interaction() {
        let f = Formula::parse("y ~ site * time").unwrap();
        assert_eq!(f.terms.len(), 3);
        assert_eq!(f.terms[0], Term::Main(Variable::plain("site")));
        assert_eq!(f.terms[1], Term::Main(Variable::plain("time")));
        assert_eq!(
            f.terms[2],
            Term::Interaction(vec![Variable::plain("site"), Variable::plain("time")])
        );
    }

    #[test]
    fn test_duplicate_terms_collapse() {
        let f = Formula::parse("y ~ site + site * time + 1").unwrap();
        assert_eq!(f.terms.len(), 3);
    }

    #[test]
    fn test_smooth_arguments() {
        let f = Formula::parse("y ~ s(doy, k=12, bs=cc) + s(time) + s(site, bs=re)").unwrap();
        assert_eq!(
            f.terms[0],
            Term::Smooth(SmoothSpec {
                var: "doy".into(),
                k: 12,
                basis: BasisKind::Cyclic
            })
        );
        assert_eq!(
            f.terms[1],
            Term::Smooth(SmoothSpec {
                var: "time".into(),
                k: DEFAULT_K,
                basis: BasisKind::Cubic
            })
        );
        match &f.terms[2] {
            Term::Smooth(s) => assert_eq!(s.basis, BasisKind::RandomEffect),
            other => panic!("unexpected term {:?}", other),
        }
        assert!(f.has_smooths());
    }

    #[test]
    fn test_display_round_trip() {
        let text = "log(chloride_mg_l) ~ site + time + site:time + s(doy, k=8, bs=cc)";
        let f = Formula::parse(text).unwrap();
        assert_eq!(f.to_string(), text);
        assert_eq!(Formula::parse(&f.to_string()).unwrap(), f);
    }

    #[test]
    fn test_columns() {
        let f = Formula::parse("y ~ site*time + s(doy)").unwrap();
        assert_eq!(f.columns(), vec!["y", "site", "time", "doy"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Formula::parse("y site").is_err());
        assert!(Formula::parse("y ~ ").is_err());
        assert!(Formula::parse("y ~ sqrt(x)").is_err());
        assert!(Formula::parse("y ~ s(x, k=3)").is_err());
        assert!(Formula::parse("y ~ s(x, k=4.5)").is_err());
        assert!(Formula::parse("y ~ s(x, bs=zz)").is_err());
        assert!(Formula::parse("y ~ s(x):site").is_err());
        assert!(Formula::parse("y ~ x $ z").is_err());
        assert!(Formula::parse("s(x) ~ z").is_err());
    }
}
