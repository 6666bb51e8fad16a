use crate::common::{InternalKeyComparator, KeyComparator, Result};
use crate::iterator::InternalIterator;
use std::cmp::Ordering;

#[derive(Eq, PartialEq, Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

/// Merges several ordered children into one ordered stream. The child
/// count is small, so smallest/largest are found by linear scan; on a
/// direction change every non-current child is re-anchored relative to
/// the current key first.
pub struct MergingIterator<'a> {
    comparator: InternalKeyComparator,
    children: Vec<Box<dyn InternalIterator + 'a>>,
    current: Option<usize>,
    direction: Direction,
}

impl<'a> MergingIterator<'a> {
    pub fn new(
        comparator: InternalKeyComparator,
        children: Vec<Box<dyn InternalIterator + 'a>>,
    ) -> Self {
        MergingIterator {
            comparator,
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            match smallest {
                None => smallest = Some(i),
                Some(s) => {
                    if self
                        .comparator
                        .compare_key(child.key(), self.children[s].key())
                        == Ordering::Less
                    {
                        smallest = Some(i);
                    }
                }
            }
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            match largest {
                None => largest = Some(i),
                Some(l) => {
                    if self
                        .comparator
                        .compare_key(child.key(), self.children[l].key())
                        == Ordering::Greater
                    {
                        largest = Some(i);
                    }
                }
            }
        }
        self.current = largest;
    }
}

impl<'a> InternalIterator for MergingIterator<'a> {
    fn valid(&self) -> bool {
        self.current
            .map_or(false, |i| self.children[i].valid())
    }

    fn seek(&mut self, target: &[u8]) {
        for child in self.children.iter_mut() {
            child.seek(target);
        }
        self.direction = Direction::Forward;
        self.find_smallest();
    }

    fn seek_to_first(&mut self) {
        for child in self.children.iter_mut() {
            child.seek_to_first();
        }
        self.direction = Direction::Forward;
        self.find_smallest();
    }

    fn seek_to_last(&mut self) {
        for child in self.children.iter_mut() {
            child.seek_to_last();
        }
        self.direction = Direction::Backward;
        self.find_largest();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        let current = self.current.unwrap();
        if self.direction != Direction::Forward {
            // Position every other child after the current key so the
            // forward scan resumes from here.
            let key = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key);
                if child.valid()
                    && self.comparator.compare_key(&key, child.key()) == Ordering::Equal
                {
                    child.next();
                }
            }
            self.direction = Direction::Forward;
        }
        self.children[self.current.unwrap()].next();
        self.find_smallest();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let current = self.current.unwrap();
        if self.direction != Direction::Backward {
            // Position every other child before the current key.
            let key = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key);
                if child.valid() {
                    // The child is at the first entry >= key; step back
                    // to land before it.
                    child.prev();
                } else {
                    child.seek_to_last();
                }
            }
            self.direction = Direction::Backward;
        }
        self.children[self.current.unwrap()].prev();
        self.find_largest();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.children[self.current.unwrap()].key()
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.children[self.current.unwrap()].value()
    }

    fn status(&self) -> Result<()> {
        for child in &self.children {
            child.status()?;
        }
        Ok(())
    }
}
