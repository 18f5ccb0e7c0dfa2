//! Architecture-specific context switching
//!
//! `init_context` prepares a fresh fiber; `switch_context` is the only
//! place a stack pointer changes hands.

/// Entry point of a fresh fiber. Receives the argument bound by
/// `init_context` and never returns.
pub type EntryFn = unsafe extern "C" fn(usize) -> !;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use self::x86_64::{init_context, switch_context, Context};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use self::aarch64::{init_context, switch_context, Context};
    } else {
        compile_error!("Unsupported architecture");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{effective_stack_size, FiberStack};

    struct PingPong {
        main: Context,
        fiber: Context,
        hits: u32,
        float_ok: bool,
    }

    unsafe extern "C" fn ping(arg: usize) -> ! {
        let pp = unsafe { &mut *(arg as *mut PingPong) };
        loop {
            pp.hits += 1;
            // exercises SSE state on the fiber stack
            let x = (pp.hits as f64) * 0.5;
            pp.float_ok = x * 2.0 == pp.hits as f64;
            unsafe { switch_context(&mut pp.fiber, &pp.main) };
        }
    }

    #[test]
    fn test_switch_round_trips() {
        let stack = FiberStack::new(effective_stack_size(0, 0)).unwrap();
        let mut pp = Box::new(PingPong {
            main: Context::default(),
            fiber: Context::default(),
            hits: 0,
            float_ok: false,
        });
        let arg = &mut *pp as *mut PingPong as usize;
        unsafe {
            init_context(&mut pp.fiber, stack.top(), ping, arg);
            for _ in 0..3 {
                let p = arg as *mut PingPong;
                switch_context(&mut (*p).main, &(*p).fiber);
            }
        }
        assert_eq!(pp.hits, 3);
        assert!(pp.float_ok);
    }
}
