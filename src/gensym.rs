// ABOUTME: Process-global unique symbol generation for macro hygiene and CPS conversion

use std::cell::Cell;

use crate::datum::{intern, Symbol};

thread_local! {
    // Two independent counters per consumer, per spec's "two-counter scheme that
    // never repeats". Kept separate for hygiene renaming vs. CPS symbol minting so
    // the two subsystems can never coin colliding names even if run interleaved.
    static HYGIENE_A: Cell<u64> = const { Cell::new(0) };
    static HYGIENE_B: Cell<u64> = const { Cell::new(0) };
    static CPS_A: Cell<u64> = const { Cell::new(0) };
    static CPS_B: Cell<u64> = const { Cell::new(0) };
}

fn bump(a: &'static std::thread::LocalKey<Cell<u64>>, b: &'static std::thread::LocalKey<Cell<u64>>) -> (u64, u64) {
    let av = a.with(|c| {
        let v = c.get();
        c.set(v.wrapping_add(1));
        v
    });
    let bv = if av == u64::MAX {
        b.with(|c| {
            let v = c.get();
            c.set(v.wrapping_add(1));
            v
        })
    } else {
        b.with(Cell::get)
    };
    (av, bv)
}

/// Reserved prefix for every core-internal symbol; user redefinition of a
/// symbol under this prefix is undefined behavior (spec.md 4.1).
pub const CORE_PREFIX: &str = "heist:core:";

/// Prefix identifying a CPS continuation *parameter* by name alone (spec.md
/// 6 Sentinels: "a continuation parameter is identified by a name beginning
/// with a fixed continuation prefix"). Deliberately distinct from the prefix
/// used for ordinary CPS-internal temporaries below: `analyze_lambda` must
/// be able to tell "this lambda's trailing parameter is the continuation
/// `cps_lambda` appended" apart from "this lambda is scaffolding the CPS
/// transformer built directly (e.g. a `let`-bound continuation receiver)
/// and its one parameter is an ordinary value", even though both shapes
/// look identical once popped down to a bare parameter list.
pub const CONT_PREFIX: &str = "heist:core:cont:";

/// Prefix for ordinary CPS-internal temporaries (argument/test/sequencing
/// binders) that are never meant to be recognized as a continuation
/// parameter by [`is_continuation_name`].
pub const TMP_PREFIX: &str = "heist:core:tmp:";

/// Mint a hygienically-renamed variant of `label`, globally unique for the
/// life of the process.
pub fn hygienic_rename(label: &str) -> Symbol {
    let (a, b) = bump(&HYGIENE_A, &HYGIENE_B);
    intern(&format!("{CORE_PREFIX}hygiene:{a}:{b}:{label}"))
}

/// Mint a fresh CPS-internal temporary (argument/test/sequencing binders).
/// Never recognized by [`is_continuation_name`] — see [`cps_continuation_symbol`].
pub fn cps_symbol(prefix: &str) -> Symbol {
    let (a, b) = bump(&CPS_A, &CPS_B);
    intern(&format!("{TMP_PREFIX}{a}:{b}:{prefix}"))
}

/// Mint a fresh continuation-parameter name: the one a transformed
/// `lambda`'s appended trailing parameter (spec.md 4.3) or `scm->cps`'s
/// outer wrapper (spec.md 4.3's topmost `(lambda (k) ...)`) receives.
pub fn cps_continuation_symbol() -> Symbol {
    let (a, b) = bump(&CPS_A, &CPS_B);
    intern(&format!("{CONT_PREFIX}{a}:{b}:k"))
}

/// True if `name` was minted by [`cps_continuation_symbol`] — used to
/// recognize a lambda's trailing parameter as the continuation the CPS
/// transform appended, as opposed to an ordinary trailing parameter or a
/// CPS-internal temporary (spec.md 6 Sentinels).
pub fn is_continuation_name(name: &str) -> bool {
    name.starts_with(CONT_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hygienic_names_never_repeat() {
        let a = hygienic_rename("tmp");
        let b = hygienic_rename("tmp");
        assert_ne!(a, b);
    }

    #[test]
    fn continuation_names_are_recognized_but_ordinary_temporaries_are_not() {
        let k = cps_continuation_symbol();
        assert!(is_continuation_name(&k));
        let v = cps_symbol("v");
        assert!(!is_continuation_name(&v));
        assert!(!is_continuation_name("k"));
    }
}
