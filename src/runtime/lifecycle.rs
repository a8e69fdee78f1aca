//! lifecycle — start/stop/play/pause, enable/disable and the tree walks.
//!
//! State product per gobj: running x playing x disabled. Wrong-state
//! operations return a state error and leave the gobj consistent.

use log::{debug, error, info, warn};

use crate::error::{GResult, GobjError};
use crate::gclass::{GCF_MANUAL_START, GCF_REQUIRED_START_TO_PLAY};
use crate::runtime::node::{GF_AUTOPLAY, GF_YUNO};
use crate::runtime::{GobjId, MonitorKind, Runtime};
use crate::schema::SDF_REQUIRED;
use crate::trace::TRACE_START_STOP;

impl Runtime {
    /// Start a gobj. Refuses if disabled, already running, or any
    /// required attribute is not set. A startable bottom starts first.
    pub fn start(&mut self, id: GobjId) -> GResult<()> {
        let node = self.node_ok(id)?;
        let gclass = node.gclass.clone();
        if node.disabled {
            error!("{}: start of a DISABLED gobj", node.short_name());
            return Err(GobjError::State("gobj disabled".to_string()));
        }
        if node.running {
            error!("{}: gobj already RUNNING", node.short_name());
            return Err(GobjError::State("gobj already running".to_string()));
        }

        let missing: Vec<String> = gclass
            .attrs
            .iter()
            .filter(|d| d.flag & SDF_REQUIRED != 0)
            .filter(|d| !self.required_attr_set(id, &d.name))
            .map(|d| d.name.clone())
            .collect();
        if !missing.is_empty() {
            error!(
                "{}: cannot start without required attributes: {:?}",
                self.short_name(id),
                missing
            );
            return Err(GobjError::State(format!(
                "required attributes not set: {:?}",
                missing
            )));
        }

        // Cascade into the bottom first.
        if let Some(b) = self.bottom_gobj(id) {
            if !self.is_disabled(b) && !self.is_running(b) {
                let manual = self
                    .gclass(b)
                    .map(|c| c.gcflag & GCF_MANUAL_START != 0)
                    .unwrap_or(true);
                if !manual {
                    let _ = self.start(b);
                }
            }
        }

        self.node_ok_mut(id)?.running = true;
        if self.trace_level_of(id) & TRACE_START_STOP != 0 {
            debug!("⏺ start: {}", self.full_name(id));
        }
        self.monitor_gobj(MonitorKind::Start, id);

        if let Some(cb) = gclass.gmt.mt_start.clone() {
            let r = cb(self, id);
            if r < 0 {
                warn!("{}: mt_start returned {}", self.short_name(id), r);
            }
        }
        Ok(())
    }

    /// Stop a gobj; a playing gobj is paused first.
    pub fn stop(&mut self, id: GobjId) -> GResult<()> {
        let node = self.node_ok(id)?;
        let gclass = node.gclass.clone();
        if !node.running {
            error!("{}: gobj NOT RUNNING", node.short_name());
            return Err(GobjError::State("gobj not running".to_string()));
        }
        if node.playing {
            info!("{}: stop of a PLAYING gobj, pausing first", node.short_name());
            let _ = self.pause(id);
        }

        self.node_ok_mut(id)?.running = false;
        if self.trace_level_of(id) & TRACE_START_STOP != 0 {
            debug!("⏹ stop: {}", self.full_name(id));
        }
        self.monitor_gobj(MonitorKind::Stop, id);

        if let Some(cb) = gclass.gmt.mt_stop.clone() {
            let r = cb(self, id);
            if r < 0 {
                warn!("{}: mt_stop returned {}", self.short_name(id), r);
            }
        }
        Ok(())
    }

    /// Play a gobj. Playing implies running: a not-running gobj is
    /// auto-started (with an error-level warning) unless the class
    /// demands an explicit start.
    pub fn play(&mut self, id: GobjId) -> GResult<()> {
        let node = self.node_ok(id)?;
        let gclass = node.gclass.clone();
        if node.disabled {
            error!("{}: play of a DISABLED gobj", node.short_name());
            return Err(GobjError::State("gobj disabled".to_string()));
        }
        if node.playing {
            error!("{}: gobj already PLAYING", node.short_name());
            return Err(GobjError::State("gobj already playing".to_string()));
        }
        if !node.running {
            if gclass.gcflag & GCF_REQUIRED_START_TO_PLAY != 0 {
                error!("{}: cannot play, start not done", node.short_name());
                return Err(GobjError::State("cannot play without start".to_string()));
            }
            error!("{}: playing without start, auto-starting", node.short_name());
            self.start(id)?;
        }

        self.node_ok_mut(id)?.playing = true;
        self.monitor_gobj(MonitorKind::Play, id);

        if let Some(cb) = gclass.gmt.mt_play.clone() {
            let r = cb(self, id);
            if r < 0 {
                // The class refused; revert.
                if let Some(n) = self.node_mut(id) {
                    n.playing = false;
                }
                return Err(GobjError::State(format!("mt_play returned {}", r)));
            }
        }
        Ok(())
    }

    pub fn pause(&mut self, id: GobjId) -> GResult<()> {
        let node = self.node_ok(id)?;
        let gclass = node.gclass.clone();
        if !node.playing {
            error!("{}: gobj NOT PLAYING", node.short_name());
            return Err(GobjError::State("gobj not playing".to_string()));
        }

        self.node_ok_mut(id)?.playing = false;
        self.monitor_gobj(MonitorKind::Pause, id);

        if let Some(cb) = gclass.gmt.mt_pause.clone() {
            let r = cb(self, id);
            if r < 0 {
                warn!("{}: mt_pause returned {}", self.short_name(id), r);
            }
        }
        Ok(())
    }

    /// Disable: mt_disable if declared, else stop_tree.
    pub fn disable(&mut self, id: GobjId) -> GResult<()> {
        let node = self.node_ok(id)?;
        let gclass = node.gclass.clone();
        self.node_ok_mut(id)?.disabled = true;
        match gclass.gmt.mt_disable.clone() {
            Some(cb) => {
                cb(self, id);
                Ok(())
            }
            None => self.stop_tree(id),
        }
    }

    /// Enable: mt_enable if declared, else start_tree.
    pub fn enable(&mut self, id: GobjId) -> GResult<()> {
        let node = self.node_ok(id)?;
        let gclass = node.gclass.clone();
        self.node_ok_mut(id)?.disabled = false;
        match gclass.gmt.mt_enable.clone() {
            Some(cb) => {
                cb(self, id);
                Ok(())
            }
            None => self.start_tree(id),
        }
    }

    // ---- Tree walks ----

    /// Start only the direct children (same gating as start_tree).
    pub fn start_childs(&mut self, id: GobjId) -> GResult<()> {
        self.node_ok(id)?;
        for c in self.childs(id) {
            let manual = self
                .gclass(c)
                .map(|g| g.gcflag & GCF_MANUAL_START != 0)
                .unwrap_or(true);
            if manual || self.is_disabled(c) || self.is_running(c) {
                continue;
            }
            if let Err(e) = self.start(c) {
                error!("start_childs: {}", e);
            }
        }
        Ok(())
    }

    pub fn stop_childs(&mut self, id: GobjId) -> GResult<()> {
        self.node_ok(id)?;
        for c in self.childs(id) {
            if self.is_running(c) {
                if let Err(e) = self.stop(c) {
                    error!("stop_childs: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Start the subtree top-to-bottom, skipping manual-start classes and
    /// disabled subtrees. Individual start errors log and don't abort the
    /// walk.
    pub fn start_tree(&mut self, id: GobjId) -> GResult<()> {
        let node = self.node_ok(id)?;
        if node.gclass.gcflag & GCF_MANUAL_START != 0 {
            return Ok(());
        }
        if node.disabled {
            return Ok(());
        }
        if !node.running {
            if let Err(e) = self.start(id) {
                error!("start_tree: {}", e);
            }
        }
        for c in self.childs(id) {
            let _ = self.start_tree(c);
        }
        Ok(())
    }

    /// Stop the subtree top-to-bottom.
    pub fn stop_tree(&mut self, id: GobjId) -> GResult<()> {
        self.node_ok(id)?;
        if self.is_running(id) {
            if let Err(e) = self.stop(id) {
                error!("stop_tree: {}", e);
            }
        }
        for c in self.childs(id) {
            let _ = self.stop_tree(c);
        }
        Ok(())
    }

    // ---- Services ----

    /// Start every registered service (skipping the yuno and disabled
    /// ones). A service whose class has mt_play gets only start(): its
    /// mt_play is expected to drive its own tree. Others get start_tree.
    pub fn autostart_services(&mut self) {
        let services: Vec<GobjId> = self.services.values().copied().collect();
        for svc in services {
            if !self.exists(svc) || self.is_disabled(svc) {
                continue;
            }
            if self.node(svc).map(|n| n.has_flag(GF_YUNO)).unwrap_or(false) {
                continue;
            }
            let has_mt_play = self
                .gclass(svc)
                .map(|c| c.gmt.mt_play.is_some())
                .unwrap_or(false);
            if has_mt_play {
                if !self.is_running(svc) {
                    if let Err(e) = self.start(svc) {
                        error!("autostart_services: {}", e);
                    }
                }
            } else {
                let _ = self.start_tree(svc);
            }
        }
    }

    /// Play the services flagged autoplay. Follows after autostart.
    pub fn autoplay_services(&mut self) {
        let services: Vec<GobjId> = self.services.values().copied().collect();
        for svc in services {
            if !self.exists(svc) || self.is_disabled(svc) {
                continue;
            }
            let autoplay = self
                .node(svc)
                .map(|n| n.has_flag(GF_AUTOPLAY))
                .unwrap_or(false);
            if autoplay && !self.is_playing(svc) {
                if let Err(e) = self.play(svc) {
                    error!("autoplay_services: {}", e);
                }
            }
        }
    }

    /// Stop the tree of every registered service.
    pub fn stop_services(&mut self) {
        let services: Vec<GobjId> = self.services.values().copied().collect();
        for svc in services {
            if !self.exists(svc) {
                continue;
            }
            if self.is_playing(svc) {
                let _ = self.pause(svc);
            }
            let _ = self.stop_tree(svc);
        }
    }

    /// Required-attr check looking through the bottom chain.
    fn required_attr_set(&self, id: GobjId, name: &str) -> bool {
        let mut cur = Some(id);
        while let Some(g) = cur {
            match self.node(g) {
                Some(n) => {
                    if n.attrs.has(name) {
                        return n.attrs.is_set(name);
                    }
                    cur = n.bottom;
                }
                None => break,
            }
        }
        false
    }
}
