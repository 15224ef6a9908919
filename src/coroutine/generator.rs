//! The generator contract driven by [`Coroutine`](crate::coroutine::Coroutine).
//!
//! A generator is a resumable computation written as an explicit state
//! machine. Each suspension yields a [`Yielded`]: a plain value (handed
//! straight back on the next tick), an awaitable whose settlement resumes
//! the generator, or a nested generator the driver wraps in its own
//! coroutine.

use crate::error::Error;
use crate::promise::Promise;

/// A value produced at a suspension point.
pub enum Yielded<T> {
    /// Resume with this value on the next tick; a cooperative yield to
    /// the loop.
    Value(T),
    /// Resume with the settlement of this awaitable.
    Awaitable(Promise<T>),
    /// Drive this generator as a nested coroutine and resume with its
    /// result.
    Nested(Box<dyn Generator<Item = T>>),
}

/// Result of resuming a generator.
pub enum GenStep<T> {
    /// The generator suspended again.
    Yielded(Yielded<T>),
    /// The generator finished with this return value.
    Done(T),
}

/// Resumable generator-style computation.
///
/// The driver starts with [`current`](Generator::current), then
/// alternates [`send`](Generator::send) (delivering the result of the
/// previous suspension) and, on rejection, [`throw`](Generator::throw).
/// A generator that does not absorb a thrown error returns it as `Err`,
/// which rejects the owning coroutine; absorbing it (cleanup logic) may
/// yield again or finish normally.
pub trait Generator {
    type Item;

    /// The first suspension. May run the body up to its first yield.
    fn current(&mut self) -> Result<Yielded<Self::Item>, Error>;

    /// Resumes with the value the last suspension produced.
    fn send(&mut self, value: Self::Item) -> Result<GenStep<Self::Item>, Error>;

    /// Resumes by injecting an error at the suspension point.
    fn throw(&mut self, error: Error) -> Result<GenStep<Self::Item>, Error>;

    /// False once the generator has finished.
    fn valid(&self) -> bool;
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    type Item = G::Item;

    fn current(&mut self) -> Result<Yielded<Self::Item>, Error> {
        (**self).current()
    }

    fn send(&mut self, value: Self::Item) -> Result<GenStep<Self::Item>, Error> {
        (**self).send(value)
    }

    fn throw(&mut self, error: Error) -> Result<GenStep<Self::Item>, Error> {
        (**self).throw(error)
    }

    fn valid(&self) -> bool {
        (**self).valid()
    }
}
