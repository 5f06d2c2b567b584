use crate::Event;
use crate::EventKind;
use crate::Forest;
use crate::ForestError;
use crate::NodeId;
use crate::NodeState;
use crate::RandomGenerator;
use crate::TimeInterval;
use crate::TimeIntervalIterator;
use crate::TreePoint;

// Longest chain of pulse migrations a lineage may follow at one time.
const MAX_PULSE_CHAIN: usize = 10000;

impl<R: RandomGenerator> Forest<R> {
    pub(crate) fn active_node(&self, i: usize) -> NodeId {
        match self.active_nodes[i] {
            Some(node) => node,
            None => panic!("active node {i} is not set"),
        }
    }

    fn node_state(&self, node: NodeId, time: f64) -> NodeState {
        let n = self.nodes.get(node);
        if n.height() > time {
            NodeState::Off
        } else if n.is_root() {
            NodeState::Coalescing
        } else {
            assert!(
                !n.local(),
                "active node {node:?} is a local branch at time {time}"
            );
            NodeState::Recombining
        }
    }

    /// Let the tree rooted at `start` coalesce into the local tree.
    ///
    /// Two lineages are followed: `start` and the local root. Whichever
    /// is lower is active first; the other joins once the time passes
    /// its height.
    ///
    /// # Panics
    ///
    /// * If `start` is not a root.
    pub(crate) fn sample_coalescences(&mut self, start: NodeId) -> Result<(), ForestError> {
        assert!(
            self.nodes.get(start).is_root(),
            "coalescences start at a root"
        );
        let local_root = self.local_root();
        self.active_nodes = if self.nodes.height(start) > self.nodes.height(local_root) {
            [Some(local_root), Some(start)]
        } else {
            [Some(start), Some(local_root)]
        };
        self.tmp_event = Event::none();
        self.coalescence_finished = false;

        let first = self.active_node(0);
        let mut tii = TimeIntervalIterator::new(self, first);
        while tii.good() {
            let ti = tii.current();
            self.states = [
                self.node_state(self.active_node(0), ti.start_height()),
                self.node_state(self.active_node(1), ti.start_height()),
            ];
            assert_ne!(self.active_node(0), self.active_node(1));
            assert!(self.states != [NodeState::Off; 2], "no active lineage");

            if self.model.has_fixed_time_event(ti.start_height()) {
                self.implement_fixed_time_event(&mut tii)?;
            }
            if self.options.contemporary_checks() {
                self.check_contemporaries(ti.start_height());
            }

            self.calc_rates(&ti);
            tracing::trace!(
                start = ti.start_height(),
                end = ti.end_height(),
                states = ?self.states,
                rates = ?self.rates,
                "coalescence interval"
            );
            self.sample_event(&ti);
            tracing::trace!(event = ?self.tmp_event, "sampled event");

            match self.tmp_event.kind() {
                EventKind::None => self.implement_no_event(&ti)?,
                EventKind::PwCoalescence => {
                    let time = self.tmp_event.time();
                    self.implement_pw_coalescence(self.active_node(0), self.active_node(1), time);
                }
                EventKind::Recombination => self.implement_recombination(&mut tii),
                EventKind::Migration { .. } => self.implement_migration(&mut tii, true),
                EventKind::Coalescence => self.implement_coalescence(&mut tii),
            }
            if self.coalescence_finished {
                return Ok(());
            }
            if tii.next(self).is_err() {
                break;
            }
        }
        panic!("the lineage of {start:?} did not coalesce");
    }

    fn calc_coalescence_rate(&self, population: usize, time: f64) -> f64 {
        self.contemporaries.size(population) as f64 * self.model.inv_double_pop_size(population, time)
    }

    fn calc_pw_coalescence_rate(&self, population: usize, time: f64) -> f64 {
        self.model.inv_double_pop_size(population, time)
    }

    /// Rate of recombination on the non-local branch above `node`,
    /// accumulated over all sequence positions since the branch
    /// stopped being local.
    pub(crate) fn calc_recombination_rate(&self, node: NodeId) -> f64 {
        let n = self.nodes.get(node);
        assert!(!n.local(), "local branches don't recombine");
        let last_update_pos = self.rec_bases[n.last_update()];
        let current_pos = self.model.current_sequence_position();
        let rate = self.model.recombination_rate();
        if last_update_pos >= current_pos {
            return (self.current_base() - last_update_pos) * rate;
        }

        let mut total = rate * (self.current_base() - current_pos);
        let mut idx = self.model.sequence_segment() - 1;
        while self.model.change_position(idx) > last_update_pos {
            total += self.model.recombination_rate_at(idx)
                * (self.model.change_position(idx + 1) - self.model.change_position(idx));
            idx -= 1;
        }
        total + self.model.recombination_rate_at(idx) * (self.model.change_position(idx + 1) - last_update_pos)
    }

    // Rates are split over three time lines: line 0 without growth,
    // line 1 with the growth of active node 0's population and
    // line 2 with the growth of active node 1's population.
    fn calc_rates(&mut self, ti: &TimeInterval) {
        self.rates = [0.0; 3];
        self.active_node_timelines = [0, 0];
        let time = ti.start_height();
        let pop0 = self.nodes.get(self.active_node(0)).population();
        let pop1 = self.nodes.get(self.active_node(1)).population();

        match self.states[0] {
            NodeState::Coalescing => {
                self.rates[0] += self.model.total_migration_rate(pop0);
                let coalescence = self.calc_coalescence_rate(pop0, time);
                if self.model.growth_rate(pop0) == 0.0 {
                    self.rates[0] += coalescence;
                } else {
                    self.rates[1] += coalescence;
                    self.active_node_timelines[0] = 1;
                }
            }
            NodeState::Recombining => {
                self.rates[0] += self.calc_recombination_rate(self.active_node(0));
            }
            NodeState::Off => {}
        }

        match self.states[1] {
            NodeState::Coalescing => {
                self.rates[0] += self.model.total_migration_rate(pop1);
                let coalescence = self.calc_coalescence_rate(pop1, time);
                let pairwise = self.states[0] == NodeState::Coalescing && pop0 == pop1;
                if self.model.growth_rate(pop1) == 0.0 {
                    self.rates[0] += coalescence;
                    if pairwise {
                        self.rates[0] += self.calc_pw_coalescence_rate(pop1, time);
                    }
                } else if pairwise {
                    self.rates[1] += coalescence + self.calc_pw_coalescence_rate(pop1, time);
                    self.active_node_timelines[1] = 1;
                } else {
                    self.rates[2] += coalescence;
                    self.active_node_timelines[1] = 2;
                }
            }
            NodeState::Recombining => {
                self.rates[0] += self.calc_recombination_rate(self.active_node(1));
            }
            NodeState::Off => {}
        }
        debug_assert!(self.rates.iter().all(|&r| r >= 0.0));
    }

    fn time_line_growth(&self, line: usize) -> f64 {
        match line {
            0 => 0.0,
            1 => self.model.growth_rate(self.nodes.get(self.active_node(0)).population()),
            2 => self.model.growth_rate(self.nodes.get(self.active_node(1)).population()),
            _ => unreachable!(),
        }
    }

    /// Sample the first event in `ti` over all time lines, if any.
    fn sample_event(&mut self, ti: &TimeInterval) {
        let mut first: Option<(f64, usize)> = None;
        for line in 0..3 {
            if self.rates[line] == 0.0 {
                continue;
            }
            let growth = self.time_line_growth(line);
            let rate = self.rates[line];
            if let Some(time) = self.rng.sample_expo_expo_limit(rate, growth, ti.length()) {
                if first.map_or(true, |(best, _)| time < best) {
                    first = Some((time, line));
                }
            }
        }
        let first = first
            .map(|(time, line)| (ti.start_height() + time, line))
            .filter(|&(time, _)| time < ti.end_height());
        self.tmp_event_time = first.map(|(time, _)| time);
        self.tmp_event = self.sample_event_type(first, ti);
    }

    /// Decide what happened at an event on the given time line.
    ///
    /// # Panics
    ///
    /// * If the time line has no rate.
    fn sample_event_type(&mut self, event: Option<(f64, usize)>, ti: &TimeInterval) -> Event {
        let (time, line) = match event {
            Some(event) => event,
            None => return Event::none(),
        };
        assert!(self.rates[line] > 0.0, "an event happened on time line {line} without rate");
        if line == 2 {
            return Event::new(EventKind::Coalescence, time, 1, Some(self.active_node(1)));
        }

        let mut sample = self.rng.sample() * self.rates[line];
        for i in 0..2 {
            let state = self.states[i];
            if state == NodeState::Off {
                continue;
            }
            let node = self.active_node(i);
            let population = self.nodes.get(node).population();

            if state == NodeState::Coalescing && self.active_node_timelines[i] == line {
                let rate = self.calc_coalescence_rate(population, ti.start_height());
                sample -= rate;
                if rate > 0.0 && sample <= 0.0 {
                    return Event::new(EventKind::Coalescence, time, i, Some(node));
                }
            }

            // Recombination and migration only happen on time line 0.
            if line != 0 {
                continue;
            }

            if state == NodeState::Recombining {
                sample -= self.calc_recombination_rate(node);
                if sample <= 0.0 {
                    return Event::new(EventKind::Recombination, time, i, Some(node));
                }
                continue;
            }

            let total_migration = self.model.total_migration_rate(population);
            if sample < total_migration {
                let mut target = None;
                for j in 0..self.model.population_number() {
                    let rate = self.model.migration_rate(population, j);
                    if rate == 0.0 {
                        continue;
                    }
                    target = Some(j);
                    sample -= rate;
                    if sample <= 0.0 {
                        break;
                    }
                }
                // Rounding can leave a tiny rest after the last population.
                return match target {
                    Some(target_population) => Event::new(
                        EventKind::Migration { target_population },
                        time,
                        i,
                        Some(node),
                    ),
                    None => panic!("no migration target for population {population}"),
                };
            }
            sample -= total_migration;
        }

        assert!(
            self.states == [NodeState::Coalescing; 2]
                && self.nodes.get(self.active_node(0)).population()
                    == self.nodes.get(self.active_node(1)).population(),
            "sampled a pairwise coalescence of lineages that can't coalesce"
        );
        Event::new(EventKind::PwCoalescence, time, 0, None)
    }

    // Move an active node to its parent if its branch ends with the interval.
    fn possibly_move_upwards(&mut self, node: NodeId, ti: &TimeInterval) -> NodeId {
        match self.nodes.get(node).parent() {
            Some(parent) if self.nodes.height(parent) == ti.end_height() => {
                self.nodes.get_mut(node).make_local();
                self.update_above(node, false, false, false);
                parent
            }
            _ => node,
        }
    }

    fn finish_at(&mut self, node: NodeId) {
        self.coalescence_finished = true;
        self.tmp_event_time = Some(self.nodes.height(node));
        self.contemporaries.replace_children(&self.nodes, node);
    }

    fn implement_no_event(&mut self, ti: &TimeInterval) -> Result<(), ForestError> {
        if ti.is_unbounded() {
            let pop0 = self.nodes.get(self.active_node(0)).population();
            let pop1 = self.nodes.get(self.active_node(1)).population();
            if pop0 != pop1 && !self.model.has_migration_after_current_time() {
                return Err(ForestError::DisconnectedLineages {
                    first: pop0.min(pop1),
                    second: pop0.max(pop1),
                });
            }
            let population = if self.model.growth_rate(pop0) < 0.0 { pop0 } else { pop1 };
            return Err(ForestError::NegativeGrowth(population));
        }

        if self.states[0] == NodeState::Recombining {
            let node = self.possibly_move_upwards(self.active_node(0), ti);
            self.active_nodes[0] = Some(node);
            if self.nodes.get(node).local() {
                tracing::trace!(?node, "active node reached the local tree");
                self.update_above(node, false, true, false);
                self.finish_at(node);
                return Ok(());
            }
        }

        if self.states[1] == NodeState::Recombining {
            let node = self.possibly_move_upwards(self.active_node(1), ti);
            self.active_nodes[1] = Some(node);
        }

        if self.active_node(0) == self.active_node(1) {
            let node = self.active_node(0);
            tracing::trace!(?node, "active nodes met");
            self.update_above(node, false, true, false);
            self.finish_at(node);
        }
        Ok(())
    }

    /// Coalesce the active lineage of the event with a random
    /// contemporary of its population.
    fn implement_coalescence(&mut self, tii: &mut TimeIntervalIterator) {
        let event = self.tmp_event;
        let i = event.active_node();
        let time = event.time();
        let mut coal_node = event.node();
        let population = self.nodes.get(coal_node).population();
        let target = self.contemporaries.sample(population, &mut self.rng);
        let target_parent = match self.nodes.get(target).parent() {
            Some(parent) => parent,
            None => panic!("contemporary {target:?} is a root"),
        };

        // A root on top of a single branch can mark the coalescence itself.
        let new_node = if self.nodes.is_unimportant(coal_node) {
            let new_node = coal_node;
            coal_node = match self.nodes.get(new_node).first_child() {
                Some(child) => child,
                None => unreachable!(),
            };
            self.nodes.move_node(new_node, time);
            self.update_above(new_node, false, false, false);
            new_node
        } else {
            let new_node = self.nodes.create_node(time, 0);
            self.nodes
                .get_mut(new_node)
                .change_child(None, Some(coal_node));
            self.nodes.get_mut(coal_node).set_parent(Some(new_node));
            self.nodes.add(new_node, Some(target));
            new_node
        };

        let (target_local, target_last_update) = {
            let t = self.nodes.get(target);
            (t.local(), t.last_update())
        };
        {
            let n = self.nodes.get_mut(new_node);
            n.set_population(population);
            n.change_child(None, Some(target));
            n.set_parent(Some(target_parent));
            if target_local {
                n.make_local();
            } else {
                n.make_nonlocal(target_last_update);
            }
        }
        if !target_local {
            self.contemporaries.add(&self.nodes, new_node);
        }
        self.nodes.get_mut(target).set_parent(Some(new_node));
        self.nodes
            .get_mut(target_parent)
            .change_child(Some(target), Some(new_node));

        self.nodes.get_mut(coal_node).make_local();
        self.update_above(coal_node, false, false, false);
        self.active_nodes[i] = Some(new_node);
        tracing::trace!(?coal_node, ?target, time, "coalescence");

        let other = 1 - i;
        if self.states[other] == NodeState::Recombining {
            let other_node = self.active_node(other);
            if self.nodes.get(other_node).parent() == Some(new_node) {
                // The coalescence hit the branch the other lineage is on.
                self.nodes.get_mut(other_node).make_local();
                self.update_above(other_node, false, false, false);
                self.update_above(new_node, false, true, false);
                self.contemporaries.remove(&self.nodes, other_node);
                self.coalescence_finished = true;
                return;
            }
        }

        if target_local {
            self.update_above(new_node, false, true, false);
            self.coalescence_finished = true;
            self.contemporaries
                .replace(&self.nodes, new_node, Some(coal_node), Some(target));
            return;
        }

        tii.split_current_interval(self, new_node, Some(target));
    }

    /// Join the two active roots under a common root at `time`.
    pub(crate) fn implement_pw_coalescence(&mut self, root_1: NodeId, root_2: NodeId, time: f64) {
        assert_eq!(
            self.nodes.get(root_1).population(),
            self.nodes.get(root_2).population()
        );
        let mut root_1 = root_1;
        let mut root_2 = root_2;
        self.nodes.get_mut(root_1).make_local();
        self.nodes.get_mut(root_2).make_local();

        let only_child = |forest: &Self, node: NodeId| match forest.nodes.get(node).first_child() {
            Some(child) => child,
            None => unreachable!(),
        };

        // Single branches on top of a tree are reused or dropped.
        let new_root = if self.nodes.is_unimportant(root_1) {
            if self.nodes.is_unimportant(root_2) {
                let child = only_child(self, root_2);
                if self.primary_root == Some(root_2) {
                    self.primary_root = None;
                }
                self.nodes.remove(root_2);
                self.nodes.get_mut(child).set_parent(None);
                root_2 = child;
            }
            self.nodes.move_node(root_1, time);
            let new_root = root_1;
            root_1 = only_child(self, new_root);
            new_root
        } else if self.nodes.is_unimportant(root_2) {
            self.nodes.move_node(root_2, time);
            let new_root = root_2;
            root_2 = only_child(self, new_root);
            new_root
        } else {
            let new_root = self.nodes.create_node(time, 0);
            self.nodes.add(new_root, Some(root_2));
            new_root
        };

        let population = self.nodes.get(root_1).population();
        self.nodes.get_mut(root_1).set_parent(Some(new_root));
        self.nodes.get_mut(root_2).set_parent(Some(new_root));
        {
            let n = self.nodes.get_mut(new_root);
            n.set_second_child(Some(root_1));
            n.set_first_child(Some(root_2));
            n.set_population(population);
        }

        self.update_above(root_1, false, false, false);
        self.update_above(root_2, false, false, false);
        self.update_above(new_root, false, false, false);
        self.coalescence_finished = true;
        tracing::trace!(?new_root, time, "pairwise coalescence");
    }

    fn implement_recombination(&mut self, tii: &mut TimeIntervalIterator) {
        let event = self.tmp_event;
        let point = TreePoint::from_absolute(&self.nodes, event.node(), event.time());
        let new_root = self.cut(point);
        self.active_nodes[event.active_node()] = Some(new_root);
        tii.recalculate_interval(self);
    }

    fn implement_migration(&mut self, tii: &mut TimeIntervalIterator, recalculate: bool) {
        let event = self.tmp_event;
        let target_population = match event.kind() {
            EventKind::Migration { target_population } => target_population,
            kind => panic!("{kind:?} is not a migration"),
        };
        let node = event.node();
        let time = event.time();
        assert!(self.nodes.get(node).is_root(), "only roots migrate");

        if self.nodes.is_unimportant(node)
            || (self.nodes.height(node) == time && self.nodes.is_migrating(node))
        {
            self.nodes.move_node(node, time);
            self.nodes.get_mut(node).set_population(target_population);
            self.update_above(node, false, true, false);
        } else {
            let mig_node = self.nodes.create_node(time, 0);
            self.nodes.add(mig_node, Some(node));
            {
                let m = self.nodes.get_mut(mig_node);
                m.set_population(target_population);
                m.set_first_child(Some(node));
            }
            self.nodes.get_mut(node).set_parent(Some(mig_node));
            self.update_above(node, false, false, false);
            self.update_above(mig_node, false, true, false);
            self.active_nodes[event.active_node()] = Some(mig_node);
            self.nodes.get_mut(node).make_local();
        }
        tracing::trace!(?node, target_population, time, "migration");

        if recalculate {
            tii.recalculate_interval(self);
        }
    }

    /// Apply the pulse migrations scheduled at the start of the
    /// current interval to all coalescing lineages.
    fn implement_fixed_time_event(&mut self, tii: &mut TimeIntervalIterator) -> Result<(), ForestError> {
        let time = tii.current().start_height();
        for i in 0..2 {
            if self.states[i] != NodeState::Coalescing {
                continue;
            }
            let mut chain = 0;
            loop {
                let node = self.active_node(i);
                let population = self.nodes.get(node).population();
                let mut sample = self.rng.sample();
                let target = (0..self.model.population_number()).find(|&j| {
                    sample -= self.model.single_mig_pop(population, j);
                    sample < 0.0
                });
                let Some(target_population) = target else {
                    break;
                };
                if chain == MAX_PULSE_CHAIN {
                    return Err(ForestError::CircularMigration {
                        population: target_population,
                        time,
                    });
                }
                chain += 1;
                self.tmp_event = Event::new(
                    EventKind::Migration { target_population },
                    time,
                    i,
                    Some(node),
                );
                self.implement_migration(tii, false);
            }
        }
        Ok(())
    }
}
